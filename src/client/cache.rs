use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

/// Identity of a cacheable request. Kept as separate fields so a body
/// containing delimiter characters can never alias another request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: String,
    pub path: String,
    pub body: String,
}

impl CacheKey {
    pub fn new(method: &str, path: &str, body: Option<&Value>) -> Self {
        // serde_json maps are ordered by key, so equal bodies serialize identically.
        let body = body.map(Value::to_string).unwrap_or_default();
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            body,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Response cache with a TTL supplied per insert.
///
/// Expired entries are dropped lazily when looked up; nothing sweeps in the
/// background. Not synchronized: the owning client serializes access.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: HashMap<CacheKey, CacheEntry>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Value> {
        self.get_at(key, Instant::now())
    }

    pub fn put(&mut self, key: CacheKey, value: Value, ttl: Duration) {
        self.put_at(key, value, ttl, Instant::now());
    }

    /// Lookup as of `now`. An entry is dead once `now` reaches its expiry.
    pub fn get_at(&mut self, key: &CacheKey, now: Instant) -> Option<Value> {
        let entry = self.entries.get(key)?;
        if now >= entry.expires_at {
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// A zero TTL stores nothing.
    pub fn put_at(&mut self, key: CacheKey, value: Value, ttl: Duration, now: Instant) {
        if ttl.is_zero() {
            return;
        }
        let Some(expires_at) = now.checked_add(ttl) else {
            return;
        };
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entry count, including expired entries not yet looked up.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
