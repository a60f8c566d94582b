//! Offline-first resource cache and background sync layer.
//!
//! swkit sits between a client application and its remote origin: it
//! intercepts outbound requests, serves responses from a local versioned
//! cache according to per-resource-type strategies, keeps the cache coherent
//! across deployments, and durably queues failed form submissions for replay
//! when connectivity returns.
//!
//! The entry point is [`worker::OfflineWorker`]: configure it with
//! [`config::Config`], drive it through [`install`](worker::OfflineWorker::install)
//! and [`activate`](worker::OfflineWorker::activate), then route every
//! outbound request through
//! [`handle_fetch`](worker::OfflineWorker::handle_fetch).

pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod queue;
pub mod strategy;
pub mod sync;
pub mod worker;

#[cfg(test)]
mod testutil;

pub use cache::{CacheEntry, CacheHandle, CacheStore, MemoryCacheStore, SqliteCacheStore};
pub use config::Config;
pub use http::{FetchRequest, FetchResponse, RequestIdentity, ResourceKind};
pub use lifecycle::WorkerState;
pub use net::{Fetcher, HttpFetcher};
pub use queue::{MemoryQueue, OfflineQueue, QueueItem, SqliteQueue};
pub use sync::{DrainReport, SyncCoordinator};
pub use worker::{ControlMessage, ControlReply, OfflineWorker};
