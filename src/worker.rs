//! The offline worker: composition root and external interface.
//!
//! All request interception funnels through a single entry point,
//! `OfflineWorker::handle_fetch`, which classifies the request and invokes
//! exactly one strategy. Connectivity signals and control messages arrive
//! through `on_sync` and `on_message`.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{debug, info};

use crate::cache::{CacheHandle, CacheStore, SqliteCacheStore, WarmOutcome};
use crate::config::Config;
use crate::http::{FetchRequest, FetchResponse, RequestIdentity};
use crate::lifecycle::{LifecycleManager, WorkerState};
use crate::net::{Fetcher, HttpFetcher};
use crate::queue::{OfflineQueue, SqliteQueue};
use crate::strategy::{FetchStrategies, Route, StrategyRouter};
use crate::sync::{DrainReport, SyncCoordinator};

/// External control commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
  /// Take over immediately, skipping the Waiting state
  SkipWaiting,
  /// Warm additional URLs into the cache, reporting per-URL outcome
  WarmCache { urls: Vec<String> },
}

/// Reply to a control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
  Ack,
  Warmed(WarmOutcome),
}

/// Client-resident mediator between the hosting application and its remote
/// origin.
pub struct OfflineWorker {
  config: Config,
  net: Arc<dyn Fetcher>,
  cache: CacheHandle,
  queue: Arc<dyn OfflineQueue>,
  router: StrategyRouter,
  strategies: FetchStrategies,
  sync: SyncCoordinator,
  lifecycle: LifecycleManager,
}

impl OfflineWorker {
  /// Worker with SQLite-backed stores at the default locations and a real
  /// HTTP transport.
  pub fn open(config: Config) -> Result<Self> {
    let timeout = config.request_timeout_secs.map(Duration::from_secs);
    let net: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(timeout)?);
    let store: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::open()?);
    let queue: Arc<dyn OfflineQueue> = Arc::new(SqliteQueue::open()?);

    Self::new(config, store, queue, net)
  }

  /// Worker over injected backends.
  pub fn new(
    config: Config,
    store: Arc<dyn CacheStore>,
    queue: Arc<dyn OfflineQueue>,
    net: Arc<dyn Fetcher>,
  ) -> Result<Self> {
    let origin = config.origin_url()?;
    let cache = CacheHandle::open(store, &config.cache_version)?;
    let router = StrategyRouter::new(&origin, config.runtime_patterns.clone());

    let offline_page = RequestIdentity::get(&config.resolve(&config.offline_page)?);
    let strategies = FetchStrategies::new(cache.clone(), Arc::clone(&net), offline_page);

    let critical = config
      .precache
      .iter()
      .map(|p| Ok(RequestIdentity::get(&config.resolve(p)?)))
      .collect::<Result<Vec<_>>>()?;
    let lifecycle = LifecycleManager::new(cache.clone(), Arc::clone(&net), critical);

    let sync = SyncCoordinator::new(Arc::clone(&queue), Arc::clone(&net));

    Ok(Self {
      config,
      net,
      cache,
      queue,
      router,
      strategies,
      sync,
      lifecycle,
    })
  }

  /// Install this worker's cache version: pre-warm the critical set.
  pub async fn install(&self) -> Result<()> {
    self.lifecycle.install().await
  }

  /// Activate: delete stale cache versions and take over request routing.
  pub fn activate(&self) -> Result<()> {
    self.lifecycle.activate()
  }

  pub fn state(&self) -> Result<WorkerState> {
    self.lifecycle.state()
  }

  /// Single interception entry point: classify the request and satisfy it
  /// through exactly one strategy.
  ///
  /// The only error paths are queue-persistence failure for a mutating
  /// request and transport failure on an untouched pass-through; every other
  /// failure resolves locally to a response.
  pub async fn handle_fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
    if request.is_mutating() {
      if self.router.classify(&request) == Route::PassThrough {
        return self.net.fetch(&request).await;
      }
      return self.submit_or_queue(request).await;
    }

    let response = match self.router.classify(&request) {
      Route::PassThrough => return self.net.fetch(&request).await,
      Route::ExternalAsset | Route::StaticAsset => self.strategies.cache_first(&request).await,
      Route::Navigation => self.strategies.navigation(&request).await,
      Route::Image => self.strategies.image(&request).await,
      Route::Data => self.strategies.network_first(&request).await,
    };

    Ok(response)
  }

  /// Connectivity-restored signal: drain one tag's queue.
  pub async fn on_sync(&self, tag: &str) -> Result<DrainReport> {
    self.sync.drain(tag).await
  }

  /// External control messages.
  pub async fn on_message(&self, message: ControlMessage) -> Result<ControlReply> {
    match message {
      ControlMessage::SkipWaiting => {
        self.lifecycle.skip_waiting()?;
        Ok(ControlReply::Ack)
      }
      ControlMessage::WarmCache { urls } => {
        let identities = urls
          .iter()
          .map(|u| Ok(RequestIdentity::get(&self.config.resolve(u)?)))
          .collect::<Result<Vec<_>>>()?;

        let outcome = self.cache.warm(&self.net, &identities).await;
        Ok(ControlReply::Warmed(outcome))
      }
    }
  }

  /// Mutating request: try the network; on transport failure, durably queue
  /// the submission for background replay.
  async fn submit_or_queue(&self, request: FetchRequest) -> Result<FetchResponse> {
    match self.net.fetch(&request).await {
      Ok(response) => Ok(response),
      Err(e) => {
        debug!("Submission to {} failed, queueing: {}", request.url, e);

        let payload = request.body.clone().unwrap_or_default();
        let content_type = request
          .content_type
          .clone()
          .unwrap_or_else(|| "application/octet-stream".to_string());

        // Enqueue failure is surfaced to the caller: silently dropping a
        // user's submission is unacceptable.
        let id = self.queue.enqueue(
          &self.config.sync_tag,
          request.url.as_str(),
          &payload,
          &content_type,
        )?;
        info!("Queued submission {} for tag {}", id, self.config.sync_tag);

        Ok(FetchResponse::queued(id))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryCacheStore;
  use crate::http::ResourceKind;
  use crate::queue::MemoryQueue;
  use crate::testutil::{get, ok_html, url, FakeFetcher, FakeOutcome};
  use std::sync::atomic::{AtomicBool, Ordering};

  fn config() -> Config {
    Config {
      origin: "https://app.example.com".to_string(),
      cache_version: "app-cache-v1".to_string(),
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/offline.html".to_string(),
      ],
      runtime_patterns: vec!["https://fonts.googleapis.com".to_string()],
      offline_page: "/offline.html".to_string(),
      sync_tag: "contact-form-sync".to_string(),
      request_timeout_secs: None,
    }
  }

  fn worker_with(net: Arc<FakeFetcher>) -> (OfflineWorker, Arc<MemoryQueue>) {
    let queue = Arc::new(MemoryQueue::new());
    let worker = OfflineWorker::new(
      config(),
      Arc::new(MemoryCacheStore::new()),
      Arc::clone(&queue) as Arc<dyn OfflineQueue>,
      net as Arc<dyn Fetcher>,
    )
    .unwrap();
    (worker, queue)
  }

  /// Transport that can be switched between online and offline mid-test.
  fn switchable() -> (Arc<FakeFetcher>, Arc<AtomicBool>) {
    let online = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&online);
    let net = Arc::new(FakeFetcher::new(move |req| {
      if flag.load(Ordering::SeqCst) {
        FakeOutcome::Respond(ok_html(format!("live:{}", req.url.path()).as_bytes()))
      } else {
        FakeOutcome::Fail("connection refused".to_string())
      }
    }));
    (net, online)
  }

  #[tokio::test]
  async fn test_offline_navigation_after_install_serves_cached_shell() {
    let (net, online) = switchable();
    let (worker, _queue) = worker_with(net);

    worker.install().await.unwrap();
    worker.activate().unwrap();
    assert_eq!(worker.state().unwrap(), WorkerState::Active);

    online.store(false, Ordering::SeqCst);

    // Precached page: served from cache
    let response = worker
      .handle_fetch(get("https://app.example.com/index.html", ResourceKind::Navigation))
      .await
      .unwrap();
    assert_eq!(response.body, b"live:/index.html");

    // Unknown page: falls back to the precached offline page
    let response = worker
      .handle_fetch(get("https://app.example.com/programs", ResourceKind::Navigation))
      .await
      .unwrap();
    assert_eq!(response.body, b"live:/offline.html");
  }

  #[tokio::test]
  async fn test_mutating_request_success_passes_response_through() {
    let (net, _online) = switchable();
    let (worker, queue) = worker_with(net);

    let request = FetchRequest::post(
      url("https://app.example.com/api/contact"),
      b"name=a".to_vec(),
      "application/x-www-form-urlencoded",
    );
    let response = worker.handle_fetch(request).await.unwrap();

    assert_eq!(response.status, 200);
    assert!(queue.list_all("contact-form-sync").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_mutating_request_failure_is_queued_and_acknowledged() {
    let (net, online) = switchable();
    let (worker, queue) = worker_with(net);
    online.store(false, Ordering::SeqCst);

    let request = FetchRequest::post(
      url("https://app.example.com/api/contact"),
      b"name=a&msg=hi".to_vec(),
      "application/x-www-form-urlencoded",
    );
    let response = worker.handle_fetch(request).await.unwrap();

    assert_eq!(response.status, 202);
    let items = queue.list_all("contact-form-sync").unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].payload, b"name=a&msg=hi");
    assert_eq!(response.header("x-swkit-queued"), Some(items[0].id.to_string().as_str()));
  }

  #[tokio::test]
  async fn test_queued_submissions_drain_when_connectivity_returns() {
    let (net, online) = switchable();
    let (worker, queue) = worker_with(net);
    online.store(false, Ordering::SeqCst);

    for payload in [b"A".as_slice(), b"B", b"C"] {
      let request = FetchRequest::post(
        url("https://app.example.com/api/contact"),
        payload.to_vec(),
        "text/plain",
      );
      worker.handle_fetch(request).await.unwrap();
    }
    assert_eq!(queue.list_all("contact-form-sync").unwrap().len(), 3);

    online.store(true, Ordering::SeqCst);
    let report = worker.on_sync("contact-form-sync").await.unwrap();

    assert_eq!(report.replayed, 3);
    assert!(queue.list_all("contact-form-sync").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_cross_origin_unmatched_passes_through_untouched() {
    let (net, online) = switchable();
    let (worker, _queue) = worker_with(Arc::clone(&net));
    online.store(false, Ordering::SeqCst);

    // Not intercepted: the transport error reaches the caller unwrapped
    let result = worker
      .handle_fetch(get("https://analytics.example.net/beacon", ResourceKind::Other))
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_warm_cache_message_reports_outcome() {
    let net = Arc::new(FakeFetcher::new(|req| {
      if req.url.path() == "/broken.css" {
        FakeOutcome::Fail("dns error".to_string())
      } else {
        FakeOutcome::Respond(ok_html(b"warmed"))
      }
    }));
    let (worker, _queue) = worker_with(net);

    let reply = worker
      .on_message(ControlMessage::WarmCache {
        urls: vec!["/extra.css".to_string(), "/broken.css".to_string()],
      })
      .await
      .unwrap();

    match reply {
      ControlReply::Warmed(outcome) => {
        assert_eq!(outcome.warmed, vec!["https://app.example.com/extra.css".to_string()]);
        assert_eq!(outcome.failed, vec!["https://app.example.com/broken.css".to_string()]);
      }
      other => panic!("expected Warmed reply, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_skip_waiting_message_takes_over_immediately() {
    let (net, _online) = switchable();
    let (worker, _queue) = worker_with(net);

    worker.install().await.unwrap();
    assert_eq!(worker.state().unwrap(), WorkerState::Waiting);

    let reply = worker.on_message(ControlMessage::SkipWaiting).await.unwrap();
    assert_eq!(reply, ControlReply::Ack);
    assert_eq!(worker.state().unwrap(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_partial_replay_leaves_only_failed_item() {
    // End to end: A and C replay, B stays queued
    let failing_b = Arc::new(FakeFetcher::new(|req| {
      if req.is_mutating() && req.body.as_deref() == Some(b"B") {
        FakeOutcome::Fail("connection reset".to_string())
      } else if req.is_mutating() {
        FakeOutcome::Respond(ok_html(b"ok"))
      } else {
        FakeOutcome::Fail("offline".to_string())
      }
    }));
    let (worker, queue) = worker_with(failing_b);

    for payload in [b"A".as_slice(), b"B", b"C"] {
      queue
        .enqueue(
          "contact-form-sync",
          "https://app.example.com/api/contact",
          payload,
          "text/plain",
        )
        .unwrap();
    }

    let report = worker.on_sync("contact-form-sync").await.unwrap();
    assert_eq!(report.replayed, 2);

    let left = queue.list_all("contact-form-sync").unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].payload, b"B");
  }
}
