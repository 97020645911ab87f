//! In-memory durable store: the reference backend for tests and
//! single-process deployments. A production deployment implements
//! [`DurableStore`](super::DurableStore) over its relational table instead.

use super::{DurableStore, StoreResult};
use crate::record::{CanonicalKey, IdempotencyRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct MemoryDurableStore {
    records: Arc<RwLock<HashMap<CanonicalKey, IdempotencyRecord>>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held. Test and diagnostics helper.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn find(&self, key: &CanonicalKey) -> StoreResult<Option<IdempotencyRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn upsert(&self, record: IdempotencyRecord) -> StoreResult<()> {
        let key = record.canonical_key();
        self.records.write().await.insert(key, record);
        Ok(())
    }
}
