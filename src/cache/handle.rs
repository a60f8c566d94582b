//! Version-bound view over a cache store.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, try_join_all};
use tracing::warn;
use url::Url;

use super::entry::CacheEntry;
use super::store::CacheStore;
use crate::http::{FetchRequest, RequestIdentity, ResourceKind};
use crate::net::Fetcher;

/// Per-identity result of an ad hoc warm-cache pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmOutcome {
  pub warmed: Vec<String>,
  pub failed: Vec<String>,
}

/// Handle bound to the current cache version.
///
/// Clone is cheap; clones share the underlying store.
#[derive(Clone)]
pub struct CacheHandle {
  store: Arc<dyn CacheStore>,
  version: String,
}

impl CacheHandle {
  /// Open the version's namespace (idempotent) and return a bound handle.
  pub fn open(store: Arc<dyn CacheStore>, version: &str) -> Result<Self> {
    store.open_version(version)?;

    Ok(Self {
      store,
      version: version.to_string(),
    })
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Exact-match lookup in the current version.
  pub fn lookup(&self, identity: &RequestIdentity) -> Result<Option<CacheEntry>> {
    self.store.get(&self.version, identity)
  }

  /// Whole-entry overwrite in the current version.
  pub fn put(&self, identity: &RequestIdentity, entry: &CacheEntry) -> Result<()> {
    self.store.put(&self.version, identity, entry)
  }

  /// Opportunistic store. Caching is an optimization on these paths, so a
  /// failed write is logged and swallowed rather than failing the request.
  pub fn put_quiet(&self, identity: &RequestIdentity, entry: &CacheEntry) {
    if let Err(e) = self.put(identity, entry) {
      warn!("Failed to cache {}: {}", identity.description(), e);
    }
  }

  /// Delete every version other than the one this handle is bound to.
  pub fn delete_other_versions(&self) -> Result<Vec<String>> {
    self.store.delete_versions_except(&self.version)
  }

  /// Pre-populate the current version with every given identity.
  ///
  /// All-or-nothing: every fetch must return HTTP 200 and every store must
  /// succeed, otherwise the whole call fails so installation cannot proceed
  /// on a partially warmed critical set.
  pub async fn add_all(
    &self,
    net: &Arc<dyn Fetcher>,
    identities: &[RequestIdentity],
  ) -> Result<()> {
    let fetches = identities.iter().map(|identity| {
      let net = Arc::clone(net);
      async move {
        let request = request_for(identity)?;
        let response = net
          .fetch(&request)
          .await
          .map_err(|e| eyre!("Failed to fetch {}: {}", identity.description(), e))?;

        if !response.is_cacheable() {
          return Err(eyre!(
            "Refusing to pre-cache {}: status {}",
            identity.description(),
            response.status
          ));
        }

        Ok((identity, CacheEntry::from_response(&response)))
      }
    });

    let fetched = try_join_all(fetches).await?;

    for (identity, entry) in fetched {
      self.put(identity, &entry)?;
    }

    Ok(())
  }

  /// Ad hoc cache population for warm-cache control messages. Best effort
  /// per identity; the outcome reports which URLs were stored and which
  /// failed, without failing the batch.
  pub async fn warm(
    &self,
    net: &Arc<dyn Fetcher>,
    identities: &[RequestIdentity],
  ) -> WarmOutcome {
    let attempts = identities.iter().map(|identity| {
      let net = Arc::clone(net);
      async move {
        let request = request_for(identity)?;
        let response = net.fetch(&request).await?;

        if !response.is_cacheable() {
          return Err(eyre!("status {}", response.status));
        }

        self.put(identity, &CacheEntry::from_response(&response))?;
        Ok(())
      }
    });

    let mut outcome = WarmOutcome::default();
    for (identity, result) in identities.iter().zip(join_all(attempts).await) {
      match result {
        Ok(()) => outcome.warmed.push(identity.url().to_string()),
        Err(e) => {
          warn!("Failed to warm {}: {}", identity.description(), e);
          outcome.failed.push(identity.url().to_string());
        }
      }
    }

    outcome
  }
}

fn request_for(identity: &RequestIdentity) -> Result<FetchRequest> {
  let url = Url::parse(identity.url())
    .map_err(|e| eyre!("Invalid cached URL {}: {}", identity.url(), e))?;

  Ok(FetchRequest {
    method: identity.method().to_string(),
    url,
    kind: ResourceKind::Other,
    body: None,
    content_type: None,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::store::MemoryCacheStore;
  use crate::http::FetchResponse;
  use crate::testutil::{ok_html, FakeFetcher, FakeOutcome};

  fn handle() -> CacheHandle {
    CacheHandle::open(Arc::new(MemoryCacheStore::new()), "v1").unwrap()
  }

  fn identities(urls: &[&str]) -> Vec<RequestIdentity> {
    urls
      .iter()
      .map(|u| RequestIdentity::get(&Url::parse(u).unwrap()))
      .collect()
  }

  #[tokio::test]
  async fn test_add_all_populates_every_identity() {
    let handle = handle();
    let net: Arc<dyn Fetcher> = Arc::new(FakeFetcher::serving(b"asset"));
    let ids = identities(&[
      "https://example.com/",
      "https://example.com/index.html",
      "https://example.com/css/styles.css",
    ]);

    handle.add_all(&net, &ids).await.unwrap();

    for id in &ids {
      let entry = handle.lookup(id).unwrap().unwrap();
      assert_eq!(entry.body, b"asset");
    }
  }

  #[tokio::test]
  async fn test_add_all_fails_when_any_fetch_fails() {
    let handle = handle();
    let net: Arc<dyn Fetcher> = Arc::new(FakeFetcher::new(|req| {
      if req.url.path() == "/missing.js" {
        FakeOutcome::Fail("connection refused".to_string())
      } else {
        FakeOutcome::Respond(ok_html(b"ok"))
      }
    }));
    let ids = identities(&["https://example.com/", "https://example.com/missing.js"]);

    assert!(handle.add_all(&net, &ids).await.is_err());

    // Nothing was stored: no partially warmed critical set
    for id in &ids {
      assert!(handle.lookup(id).unwrap().is_none());
    }
  }

  #[tokio::test]
  async fn test_add_all_rejects_non_200() {
    let handle = handle();
    let net: Arc<dyn Fetcher> = Arc::new(FakeFetcher::new(|req| {
      if req.url.path() == "/gone.css" {
        FakeOutcome::Respond(FetchResponse::new(404, Default::default(), Vec::new()))
      } else {
        FakeOutcome::Respond(ok_html(b"ok"))
      }
    }));
    let ids = identities(&["https://example.com/", "https://example.com/gone.css"]);

    assert!(handle.add_all(&net, &ids).await.is_err());
  }

  #[tokio::test]
  async fn test_warm_reports_per_url_outcome() {
    let handle = handle();
    let net: Arc<dyn Fetcher> = Arc::new(FakeFetcher::new(|req| {
      if req.url.path() == "/broken" {
        FakeOutcome::Fail("dns error".to_string())
      } else {
        FakeOutcome::Respond(ok_html(b"warm"))
      }
    }));
    let ids = identities(&["https://example.com/a", "https://example.com/broken"]);

    let outcome = handle.warm(&net, &ids).await;

    assert_eq!(outcome.warmed, vec!["https://example.com/a".to_string()]);
    assert_eq!(outcome.failed, vec!["https://example.com/broken".to_string()]);
    assert!(handle.lookup(&ids[0]).unwrap().is_some());
    assert!(handle.lookup(&ids[1]).unwrap().is_none());
  }
}
