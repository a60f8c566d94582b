//! Synchronization passes that drain the offline queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, warn};
use url::Url;

use crate::http::FetchRequest;
use crate::net::Fetcher;
use crate::queue::{OfflineQueue, QueueItem};

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
  /// Items replayed successfully and removed
  pub replayed: usize,
  /// Items left queued for the next pass
  pub remaining: usize,
}

/// Replays queued submissions when connectivity returns.
///
/// One pass per trigger: list the tag's items, replay each sequentially,
/// remove on success, leave failures queued for the next pass. A pass that
/// replays zero of N items still completes normally; there is no terminal
/// failure state.
pub struct SyncCoordinator {
  queue: Arc<dyn OfflineQueue>,
  net: Arc<dyn Fetcher>,
  /// Per-tag locks: overlapping passes for one tag serialize, distinct tags
  /// drain concurrently.
  tag_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncCoordinator {
  pub fn new(queue: Arc<dyn OfflineQueue>, net: Arc<dyn Fetcher>) -> Self {
    Self {
      queue,
      net,
      tag_locks: Mutex::new(HashMap::new()),
    }
  }

  fn tag_lock(&self, tag: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
    let mut locks = self
      .tag_locks
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(Arc::clone(locks.entry(tag.to_string()).or_default()))
  }

  /// Run one synchronization pass for a tag.
  pub async fn drain(&self, tag: &str) -> Result<DrainReport> {
    let lock = self.tag_lock(tag)?;
    let _guard = lock.lock().await;

    let items = self.queue.list_all(tag)?;
    if !items.is_empty() {
      info!("Draining {} queued submissions for tag {}", items.len(), tag);
    }

    let mut report = DrainReport {
      replayed: 0,
      remaining: 0,
    };

    for item in items {
      match self.replay(&item).await {
        Ok(()) => match self.queue.remove(item.id) {
          Ok(()) => report.replayed += 1,
          Err(e) => {
            // The item replays again next pass: duplicates are tolerated,
            // loss is not.
            warn!("Failed to remove replayed item {}: {}", item.id, e);
            report.remaining += 1;
          }
        },
        Err(e) => {
          // A stuck item must not block the rest of the queue
          debug!("Replay of item {} failed, leaving queued: {}", item.id, e);
          report.remaining += 1;
        }
      }
    }

    Ok(report)
  }

  async fn replay(&self, item: &QueueItem) -> Result<()> {
    let url = Url::parse(&item.endpoint)
      .map_err(|e| eyre!("Invalid queued endpoint {}: {}", item.endpoint, e))?;

    let request = FetchRequest::post(url, item.payload.clone(), &item.content_type);
    let response = self.net.fetch(&request).await?;

    if !response.is_success() {
      return Err(eyre!("endpoint answered {}", response.status));
    }

    Ok(())
  }
}
