use crate::clock::{Clock, SystemClock};
use crate::storage::StorageAdapter;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

// Cache entries share the KV store with the pending queues; the prefix keeps
// the two keyspaces apart.
const CACHE_PREFIX: &str = "cache:";

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    value: Value,
    stored_at: DateTime<Utc>,
    ttl_ms: i64,
}

/// TTL read-through cache for GET-style responses, keyed by request
/// fingerprint. Last write wins; expiry is checked lazily on read.
#[derive(Clone)]
pub struct ResponseCache {
    storage: Arc<dyn StorageAdapter>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: Arc<dyn StorageAdapter>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    fn storage_key(key: &str) -> String {
        format!("{CACHE_PREFIX}{key}")
    }

    /// Cached value for `key`, or `None` on miss or expiry. An entry whose TTL
    /// has lapsed is deleted by the read that notices it.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let storage_key = Self::storage_key(key);
        let raw = self
            .storage
            .get(&storage_key)
            .await
            .with_context(|| format!("failed to read cache entry {key}"))?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        // Unlike a queue, a cache entry is disposable: drop it if it does not
        // decode instead of failing the read.
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(?err, key, "dropping undecodable cache entry");
                let _ = self.storage.remove(&storage_key).await;
                return Ok(None);
            }
        };

        let age_ms = self
            .clock
            .now()
            .signed_duration_since(entry.stored_at)
            .num_milliseconds();
        if age_ms > entry.ttl_ms {
            self.storage
                .remove(&storage_key)
                .await
                .with_context(|| format!("failed to evict expired cache entry {key}"))?;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    /// Store `value` under `key` for `ttl`, overwriting any previous entry.
    pub async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        let entry = CacheEntry {
            value: value.clone(),
            stored_at: self.clock.now(),
            ttl_ms: ttl.as_millis() as i64,
        };
        let json = serde_json::to_string(&entry).context("failed to serialize cache entry")?;
        self.storage
            .set(&Self::storage_key(key), &json)
            .await
            .with_context(|| format!("failed to write cache entry {key}"))?;
        Ok(())
    }

    /// Drop `key` now. Domain services call this after a mutation that makes
    /// the cached response stale.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        self.storage
            .remove(&Self::storage_key(key))
            .await
            .with_context(|| format!("failed to invalidate cache entry {key}"))?;
        Ok(())
    }
}

/// Deterministic cache key for a request: resource path plus query
/// parameters, insensitive to parameter order.
pub fn fingerprint(resource: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return resource.to_string();
    }
    let mut sorted = params.to_vec();
    sorted.sort();
    let query: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{resource}?{}", query.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn cache_with_clock() -> (ResponseCache, Arc<ManualClock>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResponseCache::with_clock(storage.clone(), clock.clone());
        (cache, clock, storage)
    }

    #[tokio::test]
    async fn hit_within_ttl_miss_after() {
        let (cache, clock, _) = cache_with_clock();
        cache
            .set("vehicles", &json!([{ "id": "v1" }]), Duration::from_millis(1000))
            .await
            .unwrap();

        clock.advance_ms(500);
        assert_eq!(
            cache.get("vehicles").await.unwrap(),
            Some(json!([{ "id": "v1" }]))
        );

        clock.advance_ms(1000);
        assert_eq!(cache.get("vehicles").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entry_exactly_at_ttl_age_still_hits() {
        let storage = Arc::new(MemoryStorage::new());
        let start = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let cache = ResponseCache::with_clock(storage, clock.clone());

        cache
            .set("vehicles", &json!([{ "id": "v1" }]), Duration::from_millis(500))
            .await
            .unwrap();

        // An age equal to the TTL is still fresh; one past it is not.
        clock.set(start + chrono::Duration::milliseconds(500));
        assert_eq!(
            cache.get("vehicles").await.unwrap(),
            Some(json!([{ "id": "v1" }]))
        );

        clock.set(start + chrono::Duration::milliseconds(501));
        assert_eq!(cache.get("vehicles").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_by_the_read() {
        let (cache, clock, storage) = cache_with_clock();
        cache
            .set("profile", &json!({ "name": "Ada" }), Duration::from_millis(10))
            .await
            .unwrap();
        clock.advance_ms(11);

        assert_eq!(cache.get("profile").await.unwrap(), None);
        assert!(storage.get("cache:profile").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_overwrites_previous_value() {
        let (cache, _, _) = cache_with_clock();
        cache
            .set("k", &json!({ "v": 1 }), Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set("k", &json!({ "v": 2 }), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({ "v": 2 })));
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let (cache, _, _) = cache_with_clock();
        cache
            .set("vehicles", &json!([]), Duration::from_secs(60))
            .await
            .unwrap();
        cache.invalidate("vehicles").await.unwrap();
        assert_eq!(cache.get("vehicles").await.unwrap(), None);
        // invalidating a missing key is fine
        cache.invalidate("vehicles").await.unwrap();
    }

    #[tokio::test]
    async fn miss_on_never_written_key() {
        let (cache, _, _) = cache_with_clock();
        assert_eq!(cache.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn undecodable_entry_is_dropped_as_a_miss() {
        let (cache, _, storage) = cache_with_clock();
        storage.set("cache:junk", "{not json").await.unwrap();
        assert_eq!(cache.get("junk").await.unwrap(), None);
        assert!(storage.get("cache:junk").await.unwrap().is_none());
    }

    #[test]
    fn fingerprint_is_order_insensitive() {
        let a = fingerprint("vehicles", &[("brand", "bmw"), ("year", "2020")]);
        let b = fingerprint("vehicles", &[("year", "2020"), ("brand", "bmw")]);
        assert_eq!(a, b);
        assert_eq!(a, "vehicles?brand=bmw&year=2020");

        assert_ne!(a, fingerprint("vehicles", &[("brand", "audi"), ("year", "2020")]));
        assert_eq!(fingerprint("profile", &[]), "profile");
    }
}
