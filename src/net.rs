//! Network seam: the transport trait and its reqwest implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};

use crate::http::{FetchRequest, FetchResponse};

/// The real-network boundary. Strategies, installation, and replay all go
/// through this trait so tests can script the transport.
#[async_trait]
pub trait Fetcher: Send + Sync {
  /// Perform the request against the remote origin.
  ///
  /// `Err` means transport failure (no response from the origin); an origin
  /// response of any status is `Ok`.
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  /// Build a transport. With `None` no artificial timeout is applied and
  /// calls wait for the transport's own failure signal.
  pub fn new(timeout: Option<Duration>) -> Result<Self> {
    let mut builder = reqwest::Client::builder()
      // Redirects are handed back to the caller, never chased or cached.
      .redirect(reqwest::redirect::Policy::none());

    if let Some(t) = timeout {
      builder = builder.timeout(t);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid HTTP method {}: {}", request.method, e))?;

    let mut req = self.client.request(method, request.url.clone());
    if let Some(content_type) = &request.content_type {
      req = req.header(reqwest::header::CONTENT_TYPE, content_type);
    }
    if let Some(body) = &request.body {
      req = req.body(body.clone());
    }

    let response = req
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let status = response.status().as_u16();
    let mut headers = BTreeMap::new();
    for (name, value) in response.headers() {
      if let Ok(v) = value.to_str() {
        headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
      }
    }

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", request.url, e))?
      .to_vec();

    Ok(FetchResponse::new(status, headers, body))
  }
}
