//! Durable queue of pending mutating requests.
//!
//! Form submissions that fail at the network step land here instead of being
//! dropped, and are replayed by the sync coordinator when connectivity
//! returns.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};

/// A pending submission awaiting replay.
///
/// Items are never mutated in place: created on network failure, deleted
/// when a replay succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
  pub id: i64,
  pub created_at: DateTime<Utc>,
  pub endpoint: String,
  pub payload: Vec<u8>,
  pub content_type: String,
  pub tag: String,
}

/// Durable storage of queued submissions, ordered by creation time and keyed
/// by auto-incrementing id, surviving process restarts.
pub trait OfflineQueue: Send + Sync {
  /// Persist a failed submission under a sync tag. Fails loudly when the
  /// store is unavailable: data loss must be observable, not silent.
  fn enqueue(&self, tag: &str, endpoint: &str, payload: &[u8], content_type: &str) -> Result<i64>;

  /// All items for a tag in insertion order.
  fn list_all(&self, tag: &str) -> Result<Vec<QueueItem>>;

  /// Idempotent deletion; removing a missing id is a no-op.
  fn remove(&self, id: i64) -> Result<()>;
}

/// Schema for the offline queue.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS offline_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    payload BLOB NOT NULL,
    content_type TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offline_queue_tag_created
    ON offline_queue(tag, created_at);
"#;

/// SQLite-backed offline queue.
pub struct SqliteQueue {
  conn: Mutex<Connection>,
}

impl SqliteQueue {
  /// Open or create the queue at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open or create the queue at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory queue, used in tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("swkit").join("queue.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(())
  }
}

impl OfflineQueue for SqliteQueue {
  fn enqueue(&self, tag: &str, endpoint: &str, payload: &[u8], content_type: &str) -> Result<i64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT INTO offline_queue (tag, endpoint, payload, content_type, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![tag, endpoint, payload, content_type, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to enqueue submission to {}: {}", endpoint, e))?;

    Ok(conn.last_insert_rowid())
  }

  fn list_all(&self, tag: &str) -> Result<Vec<QueueItem>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT id, created_at, endpoint, payload, content_type, tag
         FROM offline_queue WHERE tag = ?
         ORDER BY created_at, id",
      )
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let items = stmt
      .query_map(params![tag], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, Vec<u8>>(3)?,
          row.get::<_, String>(4)?,
          row.get::<_, String>(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list queue items: {}", e))?
      .filter_map(|r| r.ok())
      .map(|(id, created_at, endpoint, payload, content_type, tag)| {
        Ok(QueueItem {
          id,
          created_at: parse_datetime(&created_at)?,
          endpoint,
          payload,
          content_type,
          tag,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(items)
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Deleting a missing id affects zero rows, which is fine
    conn
      .execute("DELETE FROM offline_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queue item {}: {}", id, e))?;

    Ok(())
  }
}

/// In-memory offline queue with the same contract as the SQLite backend.
#[derive(Default)]
pub struct MemoryQueue {
  inner: Mutex<MemoryQueueInner>,
}

#[derive(Default)]
struct MemoryQueueInner {
  next_id: i64,
  items: Vec<QueueItem>,
}

impl MemoryQueue {
  pub fn new() -> Self {
    Self::default()
  }
}

impl OfflineQueue for MemoryQueue {
  fn enqueue(&self, tag: &str, endpoint: &str, payload: &[u8], content_type: &str) -> Result<i64> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    inner.next_id += 1;
    let id = inner.next_id;
    inner.items.push(QueueItem {
      id,
      created_at: Utc::now(),
      endpoint: endpoint.to_string(),
      payload: payload.to_vec(),
      content_type: content_type.to_string(),
      tag: tag.to_string(),
    });

    Ok(id)
  }

  fn list_all(&self, tag: &str) -> Result<Vec<QueueItem>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      inner
        .items
        .iter()
        .filter(|item| item.tag == tag)
        .cloned()
        .collect(),
    )
  }

  fn remove(&self, id: i64) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    inner.items.retain(|item| item.id != id);
    Ok(())
  }
}

/// Parse a stored RFC 3339 timestamp.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
