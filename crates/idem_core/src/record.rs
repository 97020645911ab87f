//! Core data model: canonical keys, result envelopes, and the durable record.
//!
//! Canonical key: `(idempotency_key, endpoint, caller_id)`
//! Envelope:      `{payload, status_code, headers}` — the only result shape
//!                that ever reaches a store or a caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Minimum accepted idempotency key length (inclusive).
pub const MIN_KEY_LEN: usize = 16;
/// Maximum accepted idempotency key length (inclusive).
pub const MAX_KEY_LEN: usize = 128;

/// The resolved `(idempotency_key, endpoint, caller)` triple that addresses
/// one logical attempt in both stores. `caller_id = None` means global scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalKey {
    pub idempotency_key: String,
    pub endpoint: String,
    pub caller_id: Option<String>,
}

impl CanonicalKey {
    /// Pure, deterministic resolution. No I/O.
    pub fn resolve(
        idempotency_key: impl Into<String>,
        endpoint: impl Into<String>,
        caller_id: Option<&str>,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            endpoint: endpoint.into(),
            caller_id: caller_id.map(|c| c.to_string()),
        }
    }

    /// Store-addressable string key. Components are percent-encoded before
    /// joining so a `|` inside any component cannot collide with the
    /// delimiter.
    pub fn storage_key(&self) -> String {
        format!(
            "{}|{}|{}",
            urlencoding::encode(&self.idempotency_key),
            urlencoding::encode(&self.endpoint),
            urlencoding::encode(self.caller_id.as_deref().unwrap_or(""))
        )
    }

    /// Fast-store key for the short-lived in-flight marker. A fourth raw
    /// segment can never equal another three-segment data key.
    pub fn processing_marker_key(&self) -> String {
        format!("{}|processing", self.storage_key())
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key={} endpoint={} caller={}",
            self.idempotency_key,
            self.endpoint,
            self.caller_id.as_deref().unwrap_or("-")
        )
    }
}

/// `true` when the key length is within the accepted `[16, 128]` window.
pub fn key_len_valid(key: &str) -> bool {
    (MIN_KEY_LEN..=MAX_KEY_LEN).contains(&key.chars().count())
}

/// Canonical result of a wrapped operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Value,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl Envelope {
    pub fn new(payload: Value, status_code: u16) -> Self {
        Self {
            payload,
            status_code,
            headers: None,
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Duplicate-delivery coercion for creation endpoints: the resource
    /// already exists, so only the first delivery reports 201.
    pub fn into_duplicate(mut self) -> Self {
        if self.status_code == 201 {
            self.status_code = 200;
        }
        self
    }
}

/// Exact fast-store entry shape: `{response, status_code, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastEntry {
    pub response: Value,
    pub status_code: u16,
    pub timestamp: i64,
}

impl FastEntry {
    pub fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            response: envelope.payload.clone(),
            status_code: envelope.status_code,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// In-flight marker: no payload, no status yet.
    pub fn marker() -> Self {
        Self {
            response: Value::Null,
            status_code: 0,
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// The durable unit of truth, one row per canonical key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub endpoint: String,
    pub user_id: Option<String>,
    pub processing: bool,
    /// 0 while processing; HTTP-style status once completed.
    pub status_code: u16,
    pub response: Value,
    pub headers: Option<BTreeMap<String, String>>,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Skeleton row written when a new key is accepted.
    pub fn processing(key: &CanonicalKey) -> Self {
        Self {
            idempotency_key: key.idempotency_key.clone(),
            endpoint: key.endpoint.clone(),
            user_id: key.caller_id.clone(),
            processing: true,
            status_code: 0,
            response: Value::Null,
            headers: None,
            created_at: Utc::now(),
        }
    }

    /// Finalized row carrying the canonical envelope.
    pub fn completed(key: &CanonicalKey, envelope: &Envelope) -> Self {
        Self {
            idempotency_key: key.idempotency_key.clone(),
            endpoint: key.endpoint.clone(),
            user_id: key.caller_id.clone(),
            processing: false,
            status_code: envelope.status_code,
            response: envelope.payload.clone(),
            headers: envelope.headers.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn canonical_key(&self) -> CanonicalKey {
        CanonicalKey {
            idempotency_key: self.idempotency_key.clone(),
            endpoint: self.endpoint.clone(),
            caller_id: self.user_id.clone(),
        }
    }

    /// Only completed rows are safe to replay.
    pub fn is_completed(&self) -> bool {
        !self.processing && self.status_code != 0
    }
}
