//! Fetch strategies: how a request is satisfied from cache and network.
//!
//! Strategy entry points always produce a response. Network failures are
//! handled locally (cache fallback, offline page, synthetic error response)
//! and never propagate to the caller.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheHandle};
use crate::http::{FetchRequest, FetchResponse, RequestIdentity};
use crate::net::Fetcher;

/// Strategy set shared by all in-flight requests.
///
/// Clone is cheap; clones share the cache handle and transport.
#[derive(Clone)]
pub struct FetchStrategies {
  cache: CacheHandle,
  net: Arc<dyn Fetcher>,
  offline_page: RequestIdentity,
}

impl FetchStrategies {
  pub fn new(cache: CacheHandle, net: Arc<dyn Fetcher>, offline_page: RequestIdentity) -> Self {
    Self {
      cache,
      net,
      offline_page,
    }
  }

  /// Cache-first with background refresh.
  ///
  /// A hit is returned immediately and a detached refresh is spawned for the
  /// benefit of future requests. A miss falls through to the network.
  pub async fn cache_first(&self, request: &FetchRequest) -> FetchResponse {
    let identity = request.identity();

    if let Some(entry) = self.lookup_quiet(&identity) {
      self.spawn_refresh(request.clone());
      return entry.into_response();
    }

    self.network_fallback(request).await
  }

  /// Network-first with cache fallback.
  ///
  /// An origin response of any status is returned unmodified (only a 200 is
  /// stored); a transport failure falls back to the cached entry, then to a
  /// synthetic 503.
  pub async fn network_first(&self, request: &FetchRequest) -> FetchResponse {
    let identity = request.identity();

    match self.net.fetch(request).await {
      Ok(response) => {
        if response.is_cacheable() {
          self
            .cache
            .put_quiet(&identity, &CacheEntry::from_response(&response));
        }
        response
      }
      Err(e) => {
        debug!("Network failed for {}: {}", identity.description(), e);
        match self.lookup_quiet(&identity) {
          Some(entry) => entry.into_response(),
          None => FetchResponse::offline_unavailable(),
        }
      }
    }
  }

  /// Navigation fallback.
  ///
  /// Navigations always resolve to something renderable: the live page, the
  /// cached page, the pre-cached offline page, or (last resort) a 503.
  pub async fn navigation(&self, request: &FetchRequest) -> FetchResponse {
    let identity = request.identity();

    match self.net.fetch(request).await {
      Ok(response) => {
        if response.is_cacheable() {
          self
            .cache
            .put_quiet(&identity, &CacheEntry::from_response(&response));
        }
        response
      }
      Err(e) => {
        debug!("Navigation fetch failed for {}: {}", identity.description(), e);

        if let Some(entry) = self.lookup_quiet(&identity) {
          return entry.into_response();
        }
        if let Some(entry) = self.lookup_quiet(&self.offline_page) {
          return entry.into_response();
        }
        FetchResponse::offline_unavailable()
      }
    }
  }

  /// Image fallback: cache-first, with a placeholder graphic on total miss
  /// so image failures never break page layout.
  pub async fn image(&self, request: &FetchRequest) -> FetchResponse {
    let identity = request.identity();

    if let Some(entry) = self.lookup_quiet(&identity) {
      self.spawn_refresh(request.clone());
      return entry.into_response();
    }

    match self.net.fetch(request).await {
      Ok(response) => {
        if response.is_cacheable() {
          self
            .cache
            .put_quiet(&identity, &CacheEntry::from_response(&response));
        }
        response
      }
      Err(e) => {
        debug!("Image fetch failed for {}: {}", identity.description(), e);
        FetchResponse::placeholder_image()
      }
    }
  }

  /// Network fetch used by cache-first on miss: store a 200, hand back any
  /// other origin response unmodified, synthesize a 503 on transport failure.
  async fn network_fallback(&self, request: &FetchRequest) -> FetchResponse {
    let identity = request.identity();

    match self.net.fetch(request).await {
      Ok(response) => {
        if response.is_cacheable() {
          self
            .cache
            .put_quiet(&identity, &CacheEntry::from_response(&response));
        }
        response
      }
      Err(e) => {
        debug!("Network fallback failed for {}: {}", identity.description(), e);
        FetchResponse::offline_unavailable()
      }
    }
  }

  fn lookup_quiet(&self, identity: &RequestIdentity) -> Option<CacheEntry> {
    match self.cache.lookup(identity) {
      Ok(hit) => hit,
      Err(e) => {
        warn!("Cache lookup failed for {}: {}", identity.description(), e);
        None
      }
    }
  }

  /// Detached refresh for the benefit of future requests. The task is never
  /// joined with the originating request, and cancelling that request does
  /// not cancel the refresh.
  fn spawn_refresh(&self, request: FetchRequest) {
    let cache = self.cache.clone();
    let net = Arc::clone(&self.net);

    tokio::spawn(async move {
      let identity = request.identity();
      match net.fetch(&request).await {
        Ok(response) if response.is_cacheable() => {
          cache.put_quiet(&identity, &CacheEntry::from_response(&response));
        }
        Ok(response) => {
          debug!(
            "Skipping refresh of {}: status {}",
            identity.description(),
            response.status
          );
        }
        Err(e) => {
          debug!("Background refresh of {} failed: {}", identity.description(), e);
        }
      }
    });
  }
}
