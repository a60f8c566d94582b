//! Test doubles and builders shared by the module tests.

use std::sync::Mutex;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::http::{FetchRequest, FetchResponse, ResourceKind};
use crate::net::Fetcher;

/// What the scripted transport does with a request.
pub enum FakeOutcome {
  Respond(FetchResponse),
  Fail(String),
  /// Never resolves. Exercises callers that must not wait on the network.
  Hang,
}

/// Scripted transport: a decision closure inspects each request and picks an
/// outcome. Calls are recorded for assertions.
pub struct FakeFetcher {
  decide: Box<dyn Fn(&FetchRequest) -> FakeOutcome + Send + Sync>,
  calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
  pub fn new(decide: impl Fn(&FetchRequest) -> FakeOutcome + Send + Sync + 'static) -> Self {
    Self {
      decide: Box::new(decide),
      calls: Mutex::new(Vec::new()),
    }
  }

  /// Transport with no connectivity: every call fails.
  pub fn offline() -> Self {
    Self::new(|_| FakeOutcome::Fail("connection refused".to_string()))
  }

  /// Transport serving the same 200 body for every URL.
  pub fn serving(body: &'static [u8]) -> Self {
    Self::new(move |_| FakeOutcome::Respond(ok_html(body)))
  }

  /// Transport that never resolves any call.
  pub fn hung() -> Self {
    Self::new(|_| FakeOutcome::Hang)
  }

  /// Number of requests the transport has seen.
  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    self
      .calls
      .lock()
      .unwrap()
      .push(request.identity().description());

    match (self.decide)(request) {
      FakeOutcome::Respond(response) => Ok(response),
      FakeOutcome::Fail(msg) => Err(eyre!(msg)),
      FakeOutcome::Hang => futures::future::pending().await,
    }
  }
}

/// 200 text/html response with the given body.
pub fn ok_html(body: &[u8]) -> FetchResponse {
  ok_with_type("text/html", body)
}

/// 200 response with an explicit content type.
pub fn ok_with_type(content_type: &str, body: &[u8]) -> FetchResponse {
  let mut headers = std::collections::BTreeMap::new();
  headers.insert("content-type".to_string(), content_type.to_string());
  FetchResponse::new(200, headers, body.to_vec())
}

pub fn url(s: &str) -> Url {
  Url::parse(s).unwrap()
}

pub fn get(url_s: &str, kind: ResourceKind) -> FetchRequest {
  FetchRequest::get(url(url_s), kind)
}
