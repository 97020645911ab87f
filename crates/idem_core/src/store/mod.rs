//! Store adapters: a fast TTL cache and a durable fallback, consumed through
//! minimal async traits.
//!
//! Adapter methods return explicit `Result`s; the orchestrator's fast→durable
//! fallback is an explicit branch, never swallowed exceptions. The fast store
//! is a strictly disposable cache of the durable store's content.

use crate::record::{CanonicalKey, FastEntry, IdempotencyRecord};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub mod durable;
pub mod fast;

pub use durable::MemoryDurableStore;
pub use fast::MemoryFastStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// TTL key-value cache. Optional and disposable: every failure here is
/// recoverable by falling through to the durable store.
#[async_trait]
pub trait FastStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<FastEntry>>;
    async fn set(&self, key: &str, entry: &FastEntry, ttl: Duration) -> StoreResult<()>;
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Durable fallback, source of truth across cache restarts and outages.
/// `upsert` updates in place when a row exists for the canonical key; this is
/// how both repair and finalization work.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn find(&self, key: &CanonicalKey) -> StoreResult<Option<IdempotencyRecord>>;
    async fn upsert(&self, record: IdempotencyRecord) -> StoreResult<()>;
}
