// Read-through cache for catalog lookups. Correctness never depends on it.

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CacheConfig;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Cache operation failed: {0}")]
    OperationFailed(String),
}

/// Cache keys and their lifetimes
pub mod keys {
    use std::time::Duration;
    use uuid::Uuid;

    pub const PRODUCT_PREFIX: &str = "product:";
    pub const PRODUCT_TTL: Duration = Duration::from_secs(15 * 60);

    pub fn product(id: Uuid) -> String {
        format!("{}{}", PRODUCT_PREFIX, id)
    }

    pub fn all_products() -> String {
        format!("{}*", PRODUCT_PREFIX)
    }
}

#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Removes every key matching a glob pattern such as `product:*`
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
}

pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheBackend,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize>(
    cache: &dyn CacheBackend,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(value)?;
    cache.set(key, &raw, ttl).await
}

/// Invalidates a batch of keys; failures are logged, never returned.
pub async fn invalidate(cache: &dyn CacheBackend, keys: impl IntoIterator<Item = String>) {
    for key in keys {
        if let Err(e) = cache.delete(&key).await {
            warn!(key = %key, error = %e, "Cache invalidation failed");
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expires_at| Instant::now() > expires_at)
            .unwrap_or(false)
    }
}

/// Glob match supporting `*` (any run) and `?` (one char), which covers the Redis patterns we issue.
fn glob_matches(pattern: &[u8], key: &[u8]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_matches(&pattern[1..], key) || (!key.is_empty() && glob_matches(pattern, &key[1..]))
        }
        (Some(b'?'), Some(_)) => glob_matches(&pattern[1..], &key[1..]),
        (Some(p), Some(k)) if p == k => glob_matches(&pattern[1..], &key[1..]),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryCache {
    store: Arc<DashMap<String, CacheEntry>>,
    capacity: usize,
}

impl InMemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn make_room(&self) {
        if self.store.len() < self.capacity {
            return;
        }
        self.store.retain(|_, entry| !entry.is_expired());
        if self.store.len() >= self.capacity {
            let victim = self.store.iter().next().map(|e| e.key().clone());
            if let Some(victim) = victim {
                self.store.remove(&victim);
            }
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait::async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let expired = match self.store.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.store.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        if !self.store.contains_key(key) {
            self.make_room();
        }
        self.store
            .insert(key.to_string(), CacheEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.store.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let before = self.store.len();
        self.store
            .retain(|key, _| !glob_matches(pattern.as_bytes(), key.as_bytes()));
        Ok(before.saturating_sub(self.store.len()) as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self
            .store
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false))
    }
}

#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                redis::cmd("SETEX")
                    .arg(key)
                    .arg(ttl.as_secs().max(1))
                    .arg(value)
                    .query_async::<_, ()>(&mut conn)
                    .await?
            }
            None => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .query_async::<_, ()>(&mut conn)
                    .await?
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let count: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += count;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(pattern, removed, "Deleted cache keys by pattern");
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(exists)
    }
}

/// Builds the configured backend, falling back to memory when Redis is unreachable.
pub async fn create_cache(
    config: &CacheConfig,
    redis_url: Option<&str>,
) -> Arc<dyn CacheBackend> {
    if config.cache_type == "redis" {
        if let Some(url) = redis_url {
            match RedisCache::connect(url).await {
                Ok(cache) => return Arc::new(cache),
                Err(e) => warn!(error = %e, "Failed to connect to Redis, falling back to in-memory cache"),
            }
        }
    }
    Arc::new(InMemoryCache::new(config.capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn entries_expire() {
        let cache = InMemoryCache::default();
        cache
            .set("k", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn delete_pattern_only_touches_matching_keys() {
        let cache = InMemoryCache::default();
        let id = Uuid::new_v4();
        cache.set(&keys::product(id), "{}", None).await.unwrap();
        cache.set(&keys::product(Uuid::new_v4()), "{}", None).await.unwrap();
        cache.set("order:1", "{}", None).await.unwrap();

        let removed = cache.delete_pattern(&keys::all_products()).await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.exists("order:1").await.unwrap());
    }

    #[tokio::test]
    async fn capacity_is_bounded() {
        let cache = InMemoryCache::new(2);
        for i in 0..5 {
            cache.set(&format!("k{i}"), "v", None).await.unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.exists("k4").await.unwrap());
    }

    #[tokio::test]
    async fn json_helpers_round_trip_through_backend() {
        let cache = InMemoryCache::default();
        set_json(&cache, "n", &vec![1, 2, 3], None).await.unwrap();
        let back: Option<Vec<i32>> = get_json(&cache, "n").await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
    }

    #[test]
    fn glob_semantics() {
        assert!(glob_matches(b"product:*", b"product:abc"));
        assert!(glob_matches(b"*:1", b"order:1"));
        assert!(glob_matches(b"order:?", b"order:1"));
        assert!(!glob_matches(b"product:*", b"order:1"));
    }
}
