//! In-process fast store: bounded TTL cache with deterministic LRU eviction
//! (monotonic `last_touch` + `seq` tie-break) and a lazy expiry sweep on
//! access.

use super::{FastStore, StoreResult};
use crate::record::FastEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Slot {
    entry: FastEntry,
    expires_at: Instant,
    seq: u64,
    last_touch: u64,
}

struct Inner {
    slots: HashMap<String, Slot>,
    cap: usize,
    seq_ctr: u64,
    touch_ctr: u64,
}

impl Inner {
    #[inline]
    fn next_seq(&mut self) -> u64 {
        let n = self.seq_ctr;
        self.seq_ctr += 1;
        n
    }
    #[inline]
    fn next_touch(&mut self) -> u64 {
        let n = self.touch_ctr;
        self.touch_ctr += 1;
        n
    }

    fn sweep_expired(&mut self, now: Instant) {
        self.slots.retain(|_, slot| slot.expires_at > now);
    }

    fn evict_if_needed(&mut self) {
        if self.slots.len() <= self.cap {
            return;
        }
        if let Some(victim) = self
            .slots
            .iter()
            .min_by_key(|(_, slot)| (slot.last_touch, slot.seq))
            .map(|(k, _)| k.clone())
        {
            self.slots.remove(&victim);
        }
    }
}

#[derive(Clone)]
pub struct MemoryFastStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryFastStore {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slots: HashMap::with_capacity(cap.saturating_mul(2).min(16_384)),
                cap,
                seq_ctr: 0,
                touch_ctr: 0,
            })),
        }
    }

    pub fn from_env() -> Self {
        let cap: usize = std::env::var("IDEM_FAST_MAX_ENTRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000);
        Self::new(cap)
    }
}

#[async_trait]
impl FastStore for MemoryFastStore {
    async fn get(&self, key: &str) -> StoreResult<Option<FastEntry>> {
        let mut inner = self.inner.lock().unwrap();
        inner.sweep_expired(Instant::now());
        if inner.slots.contains_key(key) {
            // Touch to keep replayed keys alive in the LRU.
            let touch = inner.next_touch();
            let slot = inner.slots.get_mut(key).unwrap();
            slot.last_touch = touch;
            return Ok(Some(slot.entry.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, entry: &FastEntry, ttl: Duration) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.sweep_expired(now);
        let seq = inner.next_seq();
        let touch = inner.next_touch();
        inner.slots.insert(
            key.to_string(),
            Slot {
                entry: entry.clone(),
                expires_at: now + ttl,
                seq,
                last_touch: touch,
            },
        );
        inner.evict_if_needed();
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.slots.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Envelope;
    use serde_json::json;

    fn entry(id: &str) -> FastEntry {
        FastEntry::from_envelope(&Envelope::new(json!({"id": id}), 200))
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn get_returns_what_set_stored() {
        let store = MemoryFastStore::new(100);
        store.set("k1", &entry("a"), TTL).await.unwrap();
        let got = store.get("k1").await.unwrap().unwrap();
        assert_eq!(got.response, json!({"id": "a"}));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = MemoryFastStore::new(100);
        store.set("k1", &entry("a"), TTL).await.unwrap();
        store.delete("k1").await.unwrap();
        assert!(store.get("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ttl_eviction() {
        let store = MemoryFastStore::new(100);
        store
            .set("k1", &entry("a"), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.get("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn per_entry_ttls_are_independent() {
        let store = MemoryFastStore::new(100);
        store
            .set("short", &entry("a"), Duration::from_millis(1))
            .await
            .unwrap();
        store.set("long", &entry("b"), TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.get("short").await.unwrap().is_none());
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lru_eviction_is_deterministic() {
        let store = MemoryFastStore::new(2);
        store.set("k1", &entry("a"), TTL).await.unwrap();
        store.set("k2", &entry("b"), TTL).await.unwrap();
        // Touch k1 → k2 becomes LRU
        assert!(store.get("k1").await.unwrap().is_some());
        // Insert k3 → must evict k2
        store.set("k3", &entry("c"), TTL).await.unwrap();
        assert!(store.get("k1").await.unwrap().is_some());
        assert!(store.get("k2").await.unwrap().is_none());
        assert!(store.get("k3").await.unwrap().is_some());
    }
}
