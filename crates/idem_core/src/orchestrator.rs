//! Idempotency orchestrator: the request-wrapping entry point.
//!
//! validate key → fast lookup → durable lookup → (miss) guard → wrapped
//! operation → normalize → dual-write → respond. On a hit the stored envelope
//! is repaired if legacy-shaped and replayed without invoking the operation.

use crate::guard::ProcessingGuard;
use crate::normalize::{normalize, repair_stored, RawResult};
use crate::record::{
    key_len_valid, CanonicalKey, Envelope, FastEntry, IdempotencyRecord, MAX_KEY_LEN, MIN_KEY_LEN,
};
use crate::store::{DurableStore, FastStore};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// TTLs for the two classes of fast-store entries.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Lifetime of a completed envelope in the fast store.
    pub result_ttl: Duration,
    /// Lifetime of an in-flight marker. Short, so a crashed attempt cannot
    /// permanently wedge its key.
    pub processing_ttl: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            result_ttl: Duration::from_secs(3600),
            processing_ttl: Duration::from_secs(300),
        }
    }
}

impl DedupConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |var: &str, fallback: Duration| {
            std::env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };
        Self {
            result_ttl: secs("DEDUP_RESULT_TTL_SECS", defaults.result_ttl),
            processing_ttl: secs("DEDUP_PROCESSING_TTL_SECS", defaults.processing_ttl),
        }
    }
}

#[derive(Debug, Error)]
pub enum HandleError {
    /// Key rejected before any store I/O. HTTP 400 semantics, with its own
    /// error code distinct from a normal application error.
    #[error("idempotency key length {len} outside {min}..={max}", min = MIN_KEY_LEN, max = MAX_KEY_LEN)]
    InvalidKey { len: usize },
    /// A request for the same canonical key is believed in flight. HTTP 409
    /// semantics; the marker TTL bounds the wait.
    #[error("a request with this idempotency key is already in flight")]
    InFlight { retry_after_secs: u64 },
    /// The wrapped operation itself failed. Propagated as-is and never
    /// recorded: only successful completions are replayed.
    #[error(transparent)]
    Operation(#[from] anyhow::Error),
}

/// Constructed once at process start and injected wherever requests are
/// handled. The durable store is the source of truth; the fast store is a
/// disposable cache and may be absent entirely.
pub struct Orchestrator {
    fast: Option<Arc<dyn FastStore>>,
    durable: Arc<dyn DurableStore>,
    guard: ProcessingGuard,
    config: DedupConfig,
}

impl Orchestrator {
    pub fn new(
        fast: Option<Arc<dyn FastStore>>,
        durable: Arc<dyn DurableStore>,
        config: DedupConfig,
    ) -> Self {
        let guard = ProcessingGuard::new(fast.clone(), durable.clone(), config.processing_ttl);
        Self {
            fast,
            durable,
            guard,
            config,
        }
    }

    /// Execute `op` at most once per `(key, endpoint, caller)` triple and
    /// replay the stored envelope on retries. Without a key, `op` runs
    /// unconditionally and nothing touches the stores.
    pub async fn handle<F, Fut>(
        &self,
        idempotency_key: Option<&str>,
        endpoint: &str,
        caller_id: Option<&str>,
        op: F,
    ) -> Result<Envelope, HandleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<RawResult>>,
    {
        let Some(key) = idempotency_key else {
            return Ok(normalize(op().await?));
        };
        if !key_len_valid(key) {
            return Err(HandleError::InvalidKey {
                len: key.chars().count(),
            });
        }
        let canonical = CanonicalKey::resolve(key, endpoint, caller_id);

        if let Some(envelope) = self.replay_from_fast(&canonical).await {
            return Ok(envelope.into_duplicate());
        }
        if let Some(envelope) = self.replay_from_durable(&canonical).await {
            return Ok(envelope.into_duplicate());
        }
        metrics::counter!("idem_misses_total").increment(1);

        if self.guard.is_processing(&canonical).await {
            return Err(HandleError::InFlight {
                retry_after_secs: self.config.processing_ttl.as_secs(),
            });
        }
        self.guard.mark(&canonical).await;

        let raw = match op().await {
            Ok(raw) => raw,
            Err(err) => {
                // Failed attempts are not recorded; the key stays usable.
                self.guard.unmark(&canonical).await;
                return Err(HandleError::Operation(err));
            }
        };
        let envelope = normalize(raw);

        // Dual-write. Durable first: it is the source of truth. If it fails,
        // the side effect already happened, so the result is still returned —
        // the dedup guarantee for this call is simply not persisted.
        if let Err(err) = self
            .durable
            .upsert(IdempotencyRecord::completed(&canonical, &envelope))
            .await
        {
            metrics::counter!("idem_store_errors_total", "store" => "durable").increment(1);
            warn!(key = %canonical, error = %err, "durable write failed; result not replayable");
        }
        self.warm_fast(&canonical, &envelope).await;
        self.guard.unmark(&canonical).await;

        Ok(envelope)
    }

    /// Fast-store lookup. A legacy-shaped hit is repaired and the repair is
    /// written back to the fast store before the envelope is returned.
    /// Fast entries hold payload and status only, so replay headers come
    /// from the durable row.
    async fn replay_from_fast(&self, key: &CanonicalKey) -> Option<Envelope> {
        let fast = self.fast.as_ref()?;
        match fast.get(&key.storage_key()).await {
            Ok(Some(entry)) if entry.status_code != 0 => {
                metrics::counter!("idem_fast_hits_total").increment(1);
                let (mut envelope, repaired) =
                    repair_stored(entry.response, entry.status_code, None);
                if repaired {
                    metrics::counter!("idem_repairs_total", "store" => "fast").increment(1);
                    info!(key = %key, "repaired legacy fast-store entry");
                    let fixed = FastEntry::from_envelope(&envelope);
                    if let Err(err) = fast
                        .set(&key.storage_key(), &fixed, self.config.result_ttl)
                        .await
                    {
                        warn!(key = %key, error = %err, "failed to persist fast-store repair");
                    }
                }
                envelope.headers = self.durable_headers(key).await;
                Some(envelope)
            }
            Ok(_) => None,
            Err(err) => {
                metrics::counter!("idem_store_errors_total", "store" => "fast").increment(1);
                warn!(key = %key, error = %err, "fast store lookup failed; falling back");
                None
            }
        }
    }

    /// Durable lookup for a completed record. Repairs are persisted back to
    /// the durable row and the fast store is warmed with the canonical shape.
    async fn replay_from_durable(&self, key: &CanonicalKey) -> Option<Envelope> {
        match self.durable.find(key).await {
            Ok(Some(record)) if record.is_completed() => {
                metrics::counter!("idem_durable_hits_total").increment(1);
                let (envelope, repaired) =
                    repair_stored(record.response.clone(), record.status_code, record.headers.clone());
                if repaired {
                    metrics::counter!("idem_repairs_total", "store" => "durable").increment(1);
                    info!(key = %key, "repaired legacy durable record");
                    let mut fixed = record;
                    fixed.response = envelope.payload.clone();
                    fixed.status_code = envelope.status_code;
                    if let Err(err) = self.durable.upsert(fixed).await {
                        warn!(key = %key, error = %err, "failed to persist durable repair");
                    }
                }
                self.warm_fast(key, &envelope).await;
                Some(envelope)
            }
            Ok(_) => None,
            Err(err) => {
                metrics::counter!("idem_store_errors_total", "store" => "durable").increment(1);
                warn!(key = %key, error = %err, "durable store lookup failed");
                None
            }
        }
    }

    /// Replay headers for a fast hit. A durable miss or outage degrades to a
    /// headerless replay rather than failing the request.
    async fn durable_headers(&self, key: &CanonicalKey) -> Option<BTreeMap<String, String>> {
        match self.durable.find(key).await {
            Ok(Some(record)) => record.headers,
            Ok(None) => None,
            Err(err) => {
                metrics::counter!("idem_store_errors_total", "store" => "durable").increment(1);
                warn!(key = %key, error = %err, "durable header lookup failed; replaying without headers");
                None
            }
        }
    }

    /// Best-effort fast-store write of a canonical envelope.
    async fn warm_fast(&self, key: &CanonicalKey, envelope: &Envelope) {
        let Some(fast) = &self.fast else { return };
        let entry = FastEntry::from_envelope(envelope);
        if let Err(err) = fast
            .set(&key.storage_key(), &entry, self.config.result_ttl)
            .await
        {
            metrics::counter!("idem_store_errors_total", "store" => "fast").increment(1);
            warn!(key = %key, error = %err, "fast store write failed");
        }
    }
}
