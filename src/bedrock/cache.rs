//! In-memory response cache with per-entry TTL and LRU eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_MAX_SIZE: usize = 1000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Request fields that never take part in the key.
const VOLATILE_KEYS: [&str; 2] = ["timestamp", "request_id"];

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted: Instant,
    ttl: Option<Duration>,
    access_count: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.ttl.is_some_and(|ttl| now.duration_since(self.inserted) > ttl)
    }
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    /// Front is least recently used.
    order: VecDeque<String>,
}

impl<V> Inner<V> {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }

    fn remove(&mut self, key: &str) -> bool {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.entries.remove(key).is_some()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub total_accesses: u64,
    /// Share of live entries read at least once.
    pub hit_rate: f64,
}

pub struct ResponseCache<V> {
    max_size: usize,
    default_ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_TTL)
    }
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            max_size,
            default_ttl,
            inner: Mutex::new(Inner { entries: HashMap::new(), order: VecDeque::new() }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// SHA-256 over the canonical (key-sorted) JSON of `request`, ignoring
    /// `timestamp` and `request_id` at the top level.
    pub fn generate_key(request: &Value) -> String {
        let canonical = match request {
            Value::Object(map) => {
                let filtered: serde_json::Map<String, Value> = map
                    .iter()
                    .filter(|(k, _)| !VOLATILE_KEYS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Value::Object(filtered)
            }
            other => other.clone(),
        };
        hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.lock();
        let now = Instant::now();
        if inner.entries.get(key)?.is_expired(now) {
            inner.remove(key);
            return None;
        }
        inner.touch(key);
        let entry = inner.entries.get_mut(key)?;
        entry.access_count += 1;
        Some(entry.value.clone())
    }

    /// Insert with `ttl`, or the default TTL when `None`.
    pub fn put(&self, key: &str, value: V, ttl: Option<Duration>) {
        let mut inner = self.lock();
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                inserted: Instant::now(),
                ttl: Some(ttl.unwrap_or(self.default_ttl)),
                access_count: 0,
            },
        );
        inner.touch(key);
        while inner.entries.len() > self.max_size {
            let Some(lru) = inner.order.pop_front() else { break };
            inner.entries.remove(&lru);
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key)
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries; returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.lock();
        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            inner.remove(k);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "cleaned up expired cache entries");
        }
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let total_accesses = inner.entries.values().map(|e| e.access_count).sum();
        let hit_rate = if total_accesses == 0 {
            0.0
        } else {
            inner.entries.values().filter(|e| e.access_count > 0).count() as f64
                / inner.entries.len() as f64
        };
        CacheStats {
            size: inner.entries.len(),
            max_size: self.max_size,
            total_accesses,
            hit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_ignores_volatile_fields_and_order() {
        let a = json!({"prompt": "hi", "max_tokens": 10, "timestamp": 1, "request_id": "x"});
        let b = json!({"max_tokens": 10, "prompt": "hi", "timestamp": 2});
        let c = json!({"prompt": "hello", "max_tokens": 10});
        let ka = ResponseCache::<String>::generate_key(&a);
        assert_eq!(ka, ResponseCache::<String>::generate_key(&b));
        assert_ne!(ka, ResponseCache::<String>::generate_key(&c));
        assert_eq!(ka.len(), 64);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = ResponseCache::new(2, DEFAULT_TTL);
        cache.put("a", 1, None);
        cache.put("b", 2, None);
        assert_eq!(cache.get("a"), Some(1));
        cache.put("c", 3, None);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn reinsert_refreshes_recency() {
        let cache = ResponseCache::new(2, DEFAULT_TTL);
        cache.put("a", 1, None);
        cache.put("b", 2, None);
        cache.put("a", 10, None);
        cache.put("c", 3, None);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_by_ttl() {
        let cache = ResponseCache::new(10, Duration::from_secs(60));
        cache.put("short", "s", Some(Duration::from_secs(5)));
        cache.put("long", "l", None);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.get("long"), Some("l"));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.cleanup_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn stats_track_accesses() {
        let cache = ResponseCache::new(10, DEFAULT_TTL);
        assert_eq!(cache.stats().hit_rate, 0.0);
        cache.put("a", 1, None);
        cache.put("b", 2, None);
        cache.get("a");
        cache.get("a");
        let s = cache.stats();
        assert_eq!(s.size, 2);
        assert_eq!(s.max_size, 10);
        assert_eq!(s.total_accesses, 2);
        assert_eq!(s.hit_rate, 0.5);
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
