//! Processing guard: best-effort mutual exclusion between concurrent
//! duplicate submissions.
//!
//! Backed by a short-TTL marker in the fast store when one is configured,
//! otherwise by the `processing` flag on the durable record. This is not a
//! mutex: two requests racing within the check-then-set window can both
//! observe "not processing" and both execute. The marker TTL bounds how long
//! a crashed in-flight attempt can block retries of its key.

use crate::record::{CanonicalKey, FastEntry, IdempotencyRecord};
use crate::store::{DurableStore, FastStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct ProcessingGuard {
    fast: Option<Arc<dyn FastStore>>,
    durable: Arc<dyn DurableStore>,
    ttl: Duration,
}

impl ProcessingGuard {
    pub fn new(
        fast: Option<Arc<dyn FastStore>>,
        durable: Arc<dyn DurableStore>,
        ttl: Duration,
    ) -> Self {
        Self { fast, durable, ttl }
    }

    /// Whether an operation for this key is believed in flight.
    pub async fn is_processing(&self, key: &CanonicalKey) -> bool {
        if let Some(fast) = &self.fast {
            match fast.get(&key.processing_marker_key()).await {
                Ok(found) => return found.is_some(),
                Err(err) => {
                    warn!(key = %key, error = %err, "fast store down for processing check");
                }
            }
        }
        // Durable fallback: honor the flag only while younger than the
        // marker TTL, so a crashed attempt never wedges the key.
        match self.durable.find(key).await {
            Ok(Some(record)) if record.processing => {
                let age = Utc::now().signed_duration_since(record.created_at);
                age.to_std().map(|age| age < self.ttl).unwrap_or(true)
            }
            Ok(_) => false,
            Err(err) => {
                warn!(key = %key, error = %err, "durable store down for processing check");
                false
            }
        }
    }

    /// Mark the key in flight: short-TTL fast marker plus a durable
    /// `processing = true` skeleton row. Both writes are best-effort.
    pub async fn mark(&self, key: &CanonicalKey) {
        if let Some(fast) = &self.fast {
            let marker = FastEntry::marker();
            if let Err(err) = fast
                .set(&key.processing_marker_key(), &marker, self.ttl)
                .await
            {
                warn!(key = %key, error = %err, "failed to set processing marker");
            }
        }
        if let Err(err) = self.durable.upsert(IdempotencyRecord::processing(key)).await {
            warn!(key = %key, error = %err, "failed to write processing record");
        }
    }

    /// Clear the in-flight state. The durable flag is cleared only when the
    /// row is still a processing skeleton, so a finalized row written just
    /// before is left alone.
    pub async fn unmark(&self, key: &CanonicalKey) {
        if let Some(fast) = &self.fast {
            if let Err(err) = fast.delete(&key.processing_marker_key()).await {
                warn!(key = %key, error = %err, "failed to delete processing marker");
            }
        }
        match self.durable.find(key).await {
            Ok(Some(mut record)) if record.processing => {
                record.processing = false;
                if let Err(err) = self.durable.upsert(record).await {
                    warn!(key = %key, error = %err, "failed to clear processing flag");
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(key = %key, error = %err, "durable store down while unmarking");
            }
        }
    }
}
