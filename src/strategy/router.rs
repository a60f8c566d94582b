//! Request classification.

use url::{Origin, Url};

use crate::http::{FetchRequest, ResourceKind};

/// Which strategy handles an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Cross-origin resource matching the runtime pattern set (fonts, CDN
  /// assets): served cache-first.
  ExternalAsset,
  /// Cross-origin and unmatched: not intercepted, passed through untouched.
  PassThrough,
  /// Top-level document load.
  Navigation,
  Image,
  /// Style or script.
  StaticAsset,
  /// All other same-origin requests (API calls, data).
  Data,
}

/// Classifies each request and selects exactly one strategy.
pub struct StrategyRouter {
  origin: Origin,
  runtime_patterns: Vec<String>,
}

impl StrategyRouter {
  pub fn new(app_origin: &Url, runtime_patterns: Vec<String>) -> Self {
    Self {
      origin: app_origin.origin(),
      runtime_patterns,
    }
  }

  /// First match wins. The ordering is deliberate: navigations must attempt
  /// a fresh fetch before serving a stale shell, while static assets favor
  /// instant response over freshness.
  pub fn classify(&self, request: &FetchRequest) -> Route {
    if request.url.origin() != self.origin {
      if self.matches_runtime_pattern(request.url.as_str()) {
        return Route::ExternalAsset;
      }
      return Route::PassThrough;
    }

    match request.kind {
      ResourceKind::Navigation => Route::Navigation,
      ResourceKind::Image => Route::Image,
      ResourceKind::Style | ResourceKind::Script => Route::StaticAsset,
      ResourceKind::Other => Route::Data,
    }
  }

  /// Prefix or substring match against the configured pattern set.
  fn matches_runtime_pattern(&self, url: &str) -> bool {
    self.runtime_patterns.iter().any(|p| url.contains(p.as_str()))
  }
}
