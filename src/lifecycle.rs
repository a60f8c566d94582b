//! Install and activation lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::cache::CacheHandle;
use crate::http::RequestIdentity;
use crate::net::Fetcher;

/// Lifecycle states of a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Registered but not installed (or a previous installation failed)
  New,
  /// Pre-warming the critical resource set
  Installing,
  /// Installed; an existing active instance may still be serving
  Waiting,
  /// Deleting stale cache versions and claiming clients
  Activating,
  /// Steady state: all requests route through this instance
  Active,
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      WorkerState::New => write!(f, "new"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Waiting => write!(f, "waiting"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Active => write!(f, "active"),
    }
  }
}

/// Drives a worker through install, waiting, activation and takeover.
pub struct LifecycleManager {
  cache: CacheHandle,
  net: Arc<dyn Fetcher>,
  /// Identities that must be cached before this instance is usable offline.
  /// Fixed at construction; never mutated afterward.
  critical: Vec<RequestIdentity>,
  state: Mutex<WorkerState>,
  skip_waiting: AtomicBool,
}

impl LifecycleManager {
  pub fn new(cache: CacheHandle, net: Arc<dyn Fetcher>, critical: Vec<RequestIdentity>) -> Self {
    Self {
      cache,
      net,
      critical,
      state: Mutex::new(WorkerState::New),
      skip_waiting: AtomicBool::new(false),
    }
  }

  pub fn state(&self) -> Result<WorkerState> {
    let state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(*state)
  }

  fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if *state != from {
      return Err(eyre!(
        "Invalid lifecycle transition to {}: expected {}, currently {}",
        to,
        from,
        state
      ));
    }

    *state = to;
    Ok(())
  }

  fn force(&self, to: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    *state = to;
    Ok(())
  }

  /// Pre-warm the critical resource set for this instance's cache version.
  ///
  /// Failure aborts the transition and reverts to `New`: the previous active
  /// version (if any) keeps serving, and the caller retries later.
  pub async fn install(&self) -> Result<()> {
    self.transition(WorkerState::New, WorkerState::Installing)?;
    info!(
      "Installing {} ({} critical resources)",
      self.cache.version(),
      self.critical.len()
    );

    if let Err(e) = self.cache.add_all(&self.net, &self.critical).await {
      self.force(WorkerState::New)?;
      return Err(eyre!("Installation of {} failed: {}", self.cache.version(), e));
    }

    self.transition(WorkerState::Installing, WorkerState::Waiting)?;
    info!("{} installed, waiting for takeover", self.cache.version());

    if self.skip_waiting.load(Ordering::SeqCst) {
      return self.activate();
    }

    Ok(())
  }

  /// Take over immediately instead of waiting for natural handover. Sticky:
  /// requesting it before installation completes makes `install` chain
  /// straight into activation.
  pub fn skip_waiting(&self) -> Result<()> {
    self.skip_waiting.store(true, Ordering::SeqCst);

    if self.state()? == WorkerState::Waiting {
      return self.activate();
    }

    Ok(())
  }

  /// Delete every stale cache version, then claim all clients.
  ///
  /// Version deletion must run to completion before the instance counts as
  /// activated; on failure the instance returns to `Waiting`.
  pub fn activate(&self) -> Result<()> {
    self.transition(WorkerState::Waiting, WorkerState::Activating)?;

    match self.cache.delete_other_versions() {
      Ok(deleted) => {
        if !deleted.is_empty() {
          info!("Deleted stale cache versions: {}", deleted.join(", "));
        }
      }
      Err(e) => {
        self.force(WorkerState::Waiting)?;
        return Err(eyre!("Activation of {} failed: {}", self.cache.version(), e));
      }
    }

    self.transition(WorkerState::Activating, WorkerState::Active)?;
    info!("{} active, claimed all clients", self.cache.version());

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheEntry, CacheStore, MemoryCacheStore};
  use crate::testutil::{ok_html, url, FakeFetcher};

  const CRITICAL: &[&str] = &[
    "https://app.example.com/",
    "https://app.example.com/index.html",
    "https://app.example.com/offline.html",
  ];

  fn critical_identities() -> Vec<RequestIdentity> {
    CRITICAL
      .iter()
      .map(|u| RequestIdentity::get(&url(u)))
      .collect()
  }

  fn manager(
    store: Arc<dyn CacheStore>,
    version: &str,
    net: Arc<FakeFetcher>,
  ) -> LifecycleManager {
    let cache = CacheHandle::open(store, version).unwrap();
    LifecycleManager::new(cache, net as Arc<dyn Fetcher>, critical_identities())
  }

  #[tokio::test]
  async fn test_install_prewarms_every_critical_resource() {
    let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    let manager = manager(Arc::clone(&store), "v1", Arc::new(FakeFetcher::serving(b"shell")));

    manager.install().await.unwrap();
    assert_eq!(manager.state().unwrap(), WorkerState::Waiting);

    for identity in critical_identities() {
      assert!(store.get("v1", &identity).unwrap().is_some());
    }
  }

  #[tokio::test]
  async fn test_failed_install_reverts_and_preserves_prior_version() {
    let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());

    // v1 is installed and active
    store.open_version("v1").unwrap();
    let id = RequestIdentity::get(&url("https://app.example.com/"));
    store
      .put("v1", &id, &CacheEntry::from_response(&ok_html(b"v1 shell")))
      .unwrap();

    // v2 installation fails offline
    let manager = manager(Arc::clone(&store), "v2", Arc::new(FakeFetcher::offline()));
    assert!(manager.install().await.is_err());
    assert_eq!(manager.state().unwrap(), WorkerState::New);

    // No version transition occurred: v1 is intact, v2 cannot activate
    assert!(store.get("v1", &id).unwrap().is_some());
    assert!(manager.activate().is_err());
  }

  #[tokio::test]
  async fn test_install_can_be_retried_after_failure() {
    let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    let online = Arc::new(AtomicBool::new(false));
    let online_flag = Arc::clone(&online);
    let net = Arc::new(FakeFetcher::new(move |_| {
      if online_flag.load(Ordering::SeqCst) {
        crate::testutil::FakeOutcome::Respond(ok_html(b"shell"))
      } else {
        crate::testutil::FakeOutcome::Fail("offline".to_string())
      }
    }));
    let manager = manager(store, "v1", net);

    assert!(manager.install().await.is_err());

    online.store(true, Ordering::SeqCst);
    manager.install().await.unwrap();
    assert_eq!(manager.state().unwrap(), WorkerState::Waiting);
  }

  #[tokio::test]
  async fn test_activate_deletes_stale_versions() {
    let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    for version in ["v1", "v3"] {
      store.open_version(version).unwrap();
    }

    let manager = manager(Arc::clone(&store), "v2", Arc::new(FakeFetcher::serving(b"shell")));
    manager.install().await.unwrap();
    manager.activate().unwrap();

    assert_eq!(manager.state().unwrap(), WorkerState::Active);
    assert_eq!(store.list_versions().unwrap(), vec!["v2".to_string()]);
  }

  #[tokio::test]
  async fn test_activate_requires_waiting() {
    let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    let manager = manager(store, "v1", Arc::new(FakeFetcher::serving(b"shell")));

    // Not installed yet
    assert!(manager.activate().is_err());
    assert_eq!(manager.state().unwrap(), WorkerState::New);
  }

  #[tokio::test]
  async fn test_skip_waiting_after_install_activates_immediately() {
    let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    let manager = manager(store, "v1", Arc::new(FakeFetcher::serving(b"shell")));

    manager.install().await.unwrap();
    manager.skip_waiting().unwrap();
    assert_eq!(manager.state().unwrap(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_skip_waiting_before_install_is_sticky() {
    let store: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
    let manager = manager(store, "v1", Arc::new(FakeFetcher::serving(b"shell")));

    manager.skip_waiting().unwrap();
    assert_eq!(manager.state().unwrap(), WorkerState::New);

    // Install chains straight into activation
    manager.install().await.unwrap();
    assert_eq!(manager.state().unwrap(), WorkerState::Active);
  }
}
