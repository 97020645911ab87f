//! Idempotent-request deduplication layer.
//!
//! A side-effecting operation identified by a client-supplied idempotency key
//! executes at most once per `(key, endpoint, caller)` triple; every retry of
//! the same key replays the original response. Two independently-failing
//! backends cooperate: a fast TTL cache for low-latency lookups and a durable
//! store as the source of truth. Historically malformed stored payloads are
//! detected on read and repaired in place.
//!
//! The guarantees are deliberately best-effort under concurrency — see
//! [`guard::ProcessingGuard`] — and callers that need strict at-most-once
//! execution should also make the wrapped operation naturally idempotent
//! (e.g. a unique constraint in the business storage).

pub mod guard;
pub mod normalize;
pub mod orchestrator;
pub mod record;
pub mod store;

pub use normalize::{normalize, RawResult};
pub use orchestrator::{DedupConfig, HandleError, Orchestrator};
pub use record::{CanonicalKey, Envelope, FastEntry, IdempotencyRecord};
pub use store::{DurableStore, FastStore, MemoryDurableStore, MemoryFastStore, StoreError};
