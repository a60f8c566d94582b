//! Request and response types at the interception boundary.
//!
//! Every outbound request from the hosting application is observable here
//! before it reaches the network, and the worker may substitute its own
//! response.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use url::Url;

/// Inline vector graphic served when an image cannot be produced from cache
/// or network. Image failures must never break page layout.
const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="400" height="300" viewBox="0 0 400 300"><rect width="400" height="300" fill="#e2e8f0"/><rect x="150" y="105" width="100" height="75" fill="none" stroke="#94a3b8" stroke-width="4"/><circle cx="175" cy="130" r="9" fill="#94a3b8"/><path d="M158 172l28-30 20 20 26-32 18 42" fill="none" stroke="#94a3b8" stroke-width="4"/></svg>"##;

/// Declared resource type of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
  /// Top-level document load
  Navigation,
  Image,
  Style,
  Script,
  /// API calls, data fetches, anything else
  Other,
}

/// An outbound request observed at the interception boundary.
///
/// Required fields per the boundary contract: method, URL, declared resource
/// type, and (for mutating requests) the payload to submit.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: String,
  pub url: Url,
  pub kind: ResourceKind,
  pub body: Option<Vec<u8>>,
  pub content_type: Option<String>,
}

impl FetchRequest {
  /// A plain GET for the given resource type.
  pub fn get(url: Url, kind: ResourceKind) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      kind,
      body: None,
      content_type: None,
    }
  }

  /// A POST submission carrying a payload.
  pub fn post(url: Url, body: Vec<u8>, content_type: &str) -> Self {
    Self {
      method: "POST".to_string(),
      url,
      kind: ResourceKind::Other,
      body: Some(body),
      content_type: Some(content_type.to_string()),
    }
  }

  /// Whether this request is non-idempotent and must never be cached.
  pub fn is_mutating(&self) -> bool {
    matches!(
      self.method.to_ascii_uppercase().as_str(),
      "POST" | "PUT" | "PATCH" | "DELETE"
    )
  }

  /// The canonical cache key for this request.
  pub fn identity(&self) -> RequestIdentity {
    RequestIdentity::new(&self.method, &self.url)
  }
}

/// Canonical key addressing a cached response: method + absolute URL.
///
/// Mutating requests are never used as cache identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestIdentity {
  method: String,
  url: String,
}

impl RequestIdentity {
  pub fn new(method: &str, url: &Url) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  /// Identity of a GET for the given URL (the common case).
  pub fn get(url: &Url) -> Self {
    Self::new("GET", url)
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Human-readable form for logs.
  pub fn description(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

/// A response produced by the network, the cache, or synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
  pub status: u16,
  /// Header names are stored lowercase.
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl FetchResponse {
  pub fn new(status: u16, headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
    }
  }

  /// 2xx success, used for replay acknowledgement.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Strict cache eligibility: only a plain 200 may be stored. Redirects and
  /// error pages are returned to the caller but never poison the cache.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  /// Synthetic 503 for requests that cannot be satisfied offline.
  pub fn offline_unavailable() -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "text/plain".to_string());
    Self::new(503, headers, b"Resource not available offline".to_vec())
  }

  /// Placeholder image served on total miss so layout never breaks.
  pub fn placeholder_image() -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "image/svg+xml".to_string());
    Self::new(200, headers, PLACEHOLDER_SVG.as_bytes().to_vec())
  }

  /// Synthetic 202 acknowledging that a mutating request was durably queued
  /// for background replay.
  pub fn queued(id: i64) -> Self {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "text/plain".to_string());
    headers.insert("x-swkit-queued".to_string(), id.to_string());
    Self::new(202, headers, b"Queued for background sync".to_vec())
  }
}
