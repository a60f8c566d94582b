//! Cached response record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::FetchResponse;

/// A cached response plus metadata.
///
/// The body is immutable once stored; updates replace the entire entry
/// atomically. No partial writes are observable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub status: u16,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
  /// When the entry was stored
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Snapshot a network response for storage.
  pub fn from_response(response: &FetchResponse) -> Self {
    Self {
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      stored_at: Utc::now(),
    }
  }

  /// Rehydrate the response served to the caller.
  pub fn into_response(self) -> FetchResponse {
    FetchResponse::new(self.status, self.headers, self.body)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_round_trip_preserves_payload() {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "text/html".to_string());
    let response = FetchResponse::new(200, headers.clone(), b"<html></html>".to_vec());

    let entry = CacheEntry::from_response(&response);
    assert_eq!(entry.status, 200);

    let served = entry.into_response();
    assert_eq!(served, response);
  }
}
