//! Cache store trait and its SQLite and in-memory implementations.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};

use super::entry::CacheEntry;
use crate::http::RequestIdentity;

/// Versioned, durable storage of cached responses.
///
/// All reads and writes during normal operation target the current version;
/// every other version is subject to deletion during activation.
pub trait CacheStore: Send + Sync {
  /// Register a version's storage namespace. Idempotent; never fails for
  /// valid version strings.
  fn open_version(&self, version: &str) -> Result<()>;

  /// Exact-match lookup; no partial or fuzzy matching.
  fn get(&self, version: &str, identity: &RequestIdentity) -> Result<Option<CacheEntry>>;

  /// Whole-entry overwrite; last writer wins; no merge.
  fn put(&self, version: &str, identity: &RequestIdentity, entry: &CacheEntry) -> Result<()>;

  /// All versions currently known to the store.
  fn list_versions(&self) -> Result<Vec<String>>;

  /// Remove every version other than `current`, returning the names deleted.
  fn delete_versions_except(&self, current: &str) -> Result<Vec<String>>;
}

/// Schema for the versioned response cache.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_versions (
    version TEXT PRIMARY KEY,
    opened_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per cached response, namespaced by version.
CREATE TABLE IF NOT EXISTS response_cache (
    version TEXT NOT NULL,
    identity_hash TEXT NOT NULL,
    identity TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (version, identity_hash)
);
"#;

/// SQLite-backed cache store.
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
}

impl SqliteCacheStore {
  /// Open or create the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open or create the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory store, used in tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("swkit").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

impl CacheStore for SqliteCacheStore {
  fn open_version(&self, version: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_versions (version) VALUES (?)",
        params![version],
      )
      .map_err(|e| eyre!("Failed to open cache version {}: {}", version, e))?;

    Ok(())
  }

  fn get(&self, version: &str, identity: &RequestIdentity) -> Result<Option<CacheEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, stored_at FROM response_cache
         WHERE version = ? AND identity_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare cache lookup: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![version, identity.cache_hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, headers_json, body, stored_at)) => {
        let headers = serde_json::from_str(&headers_json)
          .map_err(|e| eyre!("Failed to parse cached headers: {}", e))?;

        Ok(Some(CacheEntry {
          status,
          headers,
          body,
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, version: &str, identity: &RequestIdentity, entry: &CacheEntry) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers_json =
      serde_json::to_string(&entry.headers).map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    // Single-row replace keeps whole-entry writes atomic.
    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache
           (version, identity_hash, identity, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          version,
          identity.cache_hash(),
          identity.description(),
          entry.status,
          headers_json,
          entry.body,
          entry.stored_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", identity.description(), e))?;

    Ok(())
  }

  fn list_versions(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT version FROM cache_versions ORDER BY version")
      .map_err(|e| eyre!("Failed to prepare version query: {}", e))?;

    let versions = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache versions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(versions)
  }

  fn delete_versions_except(&self, current: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT version FROM cache_versions WHERE version != ?")
      .map_err(|e| eyre!("Failed to prepare version query: {}", e))?;

    let stale: Vec<String> = stmt
      .query_map(params![current], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stale versions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    conn
      .execute(
        "DELETE FROM response_cache WHERE version != ?",
        params![current],
      )
      .map_err(|e| eyre!("Failed to delete stale cache entries: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_versions WHERE version != ?",
        params![current],
      )
      .map_err(|e| eyre!("Failed to delete stale cache versions: {}", e))?;

    Ok(stale)
  }
}

/// In-memory cache store. Preserves the same contract as the SQLite backend;
/// useful for tests and embedders that snapshot their own state.
#[derive(Default)]
pub struct MemoryCacheStore {
  inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
  versions: BTreeSet<String>,
  entries: HashMap<(String, String), CacheEntry>,
}

impl MemoryCacheStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStore for MemoryCacheStore {
  fn open_version(&self, version: &str) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    inner.versions.insert(version.to_string());
    Ok(())
  }

  fn get(&self, version: &str, identity: &RequestIdentity) -> Result<Option<CacheEntry>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let key = (version.to_string(), identity.cache_hash());
    Ok(inner.entries.get(&key).cloned())
  }

  fn put(&self, version: &str, identity: &RequestIdentity, entry: &CacheEntry) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let key = (version.to_string(), identity.cache_hash());
    inner.entries.insert(key, entry.clone());
    Ok(())
  }

  fn list_versions(&self) -> Result<Vec<String>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(inner.versions.iter().cloned().collect())
  }

  fn delete_versions_except(&self, current: &str) -> Result<Vec<String>> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let stale: Vec<String> = inner
      .versions
      .iter()
      .filter(|v| v.as_str() != current)
      .cloned()
      .collect();

    inner.versions.retain(|v| v == current);
    inner.entries.retain(|(version, _), _| version == current);

    Ok(stale)
  }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
