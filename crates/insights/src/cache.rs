use crate::insight_core::clock::{Clock, SystemClock};
use crate::insight_core::error::InsightError;
use crate::insight_core::store::KeyValueStore;
use crate::insight_types::InsightsResult;
use crate::insights::config::DEFAULT_CACHE_TTL;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Store key prefix; the full key is `"{CACHE_KEY_PREFIX}:{key}"`.
pub const CACHE_KEY_PREFIX: &str = "portfolio_insights_cache";

/// Persisted cache blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: InsightsResult,
    #[serde(rename = "storedAtMillis")]
    pub stored_at_millis: i64,
}

/// TTL-bound store of the last completed result per session/thread key.
pub struct ResultCache<S> {
    store: S,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<S: KeyValueStore> ResultCache<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, DEFAULT_CACHE_TTL, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            ttl,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn storage_key(key: &str) -> String {
        format!("{CACHE_KEY_PREFIX}:{key}")
    }

    /// Run `f` holding the lock for `key`. The lock is dropped from the map
    /// again once no other caller holds it, so the map only tracks keys in use.
    fn with_key_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let key_lock = lock(&self.locks)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let out = {
            let _guard = lock(&key_lock);
            f()
        };
        drop(key_lock);

        // clones are only taken under the map lock, so a count of one is the map's own
        let mut locks = lock(&self.locks);
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
        out
    }

    #[cfg(test)]
    pub(crate) fn tracked_keys(&self) -> usize {
        lock(&self.locks).len()
    }

    /// Cached result for `key`, or `None` when absent, expired or unreadable.
    /// Expired and unreadable entries are evicted.
    pub fn get(&self, key: &str) -> Option<InsightsResult> {
        self.with_key_lock(key, || self.read(key))
    }

    fn read(&self, key: &str) -> Option<InsightsResult> {
        let storage_key = Self::storage_key(key);

        let raw = match self.store.get(&storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(target: "insight_stream::cache", %key, error = %err, "cache read failed");
                return None;
            }
        };

        let entry = match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                debug!(target: "insight_stream::cache", %key, error = %err, "evicting corrupt cache entry");
                self.evict(&storage_key);
                return None;
            }
        };

        let age_ms = self.clock.now_millis().saturating_sub(entry.stored_at_millis);
        if age_ms > self.ttl.as_millis().min(i64::MAX as u128) as i64 {
            debug!(target: "insight_stream::cache", %key, age_ms, "evicting expired cache entry");
            self.evict(&storage_key);
            return None;
        }
        Some(entry.data)
    }

    pub fn put(&self, key: &str, result: &InsightsResult) -> Result<(), InsightError> {
        self.with_key_lock(key, || self.write(key, result))
    }

    fn write(&self, key: &str, result: &InsightsResult) -> Result<(), InsightError> {
        let entry = CacheEntry {
            data: result.clone(),
            stored_at_millis: self.clock.now_millis(),
        };
        let blob = serde_json::to_string(&entry)?;
        self.store.set(&Self::storage_key(key), &blob)?;
        debug!(
            target: "insight_stream::cache",
            %key,
            insights = result.insights.len(),
            "cached insights result"
        );
        Ok(())
    }

    pub fn clear(&self, key: &str) -> Result<(), InsightError> {
        self.with_key_lock(key, || {
            self.store.remove(&Self::storage_key(key))?;
            Ok(())
        })
    }

    fn evict(&self, storage_key: &str) {
        if let Err(err) = self.store.remove(storage_key) {
            warn!(target: "insight_stream::cache", key = storage_key, error = %err, "cache eviction failed");
        }
    }
}
