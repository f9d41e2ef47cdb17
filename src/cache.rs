//! Key/value cache with an optional expiry per key.
//!
//! Backed by Redis when a URL is configured, otherwise by an in-process map.
//! A missing key is `Ok(None)`; only backend failures are errors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Clone)]
pub enum Cache {
    Redis(ConnectionManager),
    Memory(Arc<Mutex<HashMap<String, MemoryEntry>>>),
}

impl Cache {
    /// Connect to Redis at `url`.
    pub async fn redis(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Cache::Redis(manager))
    }

    pub fn memory() -> Self {
        Cache::Memory(Arc::new(Mutex::new(HashMap::new())))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self {
            Cache::Redis(manager) => {
                let mut conn = manager.clone();
                Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
            }
            Cache::Memory(map) => {
                let mut map = map.lock().unwrap_or_else(PoisonError::into_inner);
                let expired = match map.get(key) {
                    None => return Ok(None),
                    Some(entry) => entry.expires_at.is_some_and(|at| at <= Instant::now()),
                };
                if expired {
                    map.remove(key);
                    return Ok(None);
                }
                Ok(map.get(key).map(|entry| entry.value.clone()))
            }
        }
    }

    /// Store `value`. `ttl` of `None` keeps the key until it is deleted.
    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        match self {
            Cache::Redis(manager) => {
                let mut conn = manager.clone();
                match ttl {
                    Some(ttl) => {
                        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                            .await?
                    }
                    None => conn.set::<_, _, ()>(key, value).await?,
                }
                Ok(())
            }
            Cache::Memory(map) => {
                let mut map = map.lock().unwrap_or_else(PoisonError::into_inner);
                map.insert(
                    key.to_string(),
                    MemoryEntry {
                        value: value.to_vec(),
                        expires_at: ttl.map(|ttl| Instant::now() + ttl),
                    },
                );
                Ok(())
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match self {
            Cache::Redis(manager) => {
                let mut conn = manager.clone();
                conn.del::<_, ()>(key).await?;
                Ok(())
            }
            Cache::Memory(map) => {
                map.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(key);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let cache = Cache::memory();
        assert_eq!(cache.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = Cache::memory();
        cache.set("roles", b"[]", None).await.unwrap();
        assert_eq!(cache.get("roles").await.unwrap(), Some(b"[]".to_vec()));

        cache.delete("roles").await.unwrap();
        assert_eq!(cache.get("roles").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = Cache::memory();
        cache
            .set("short", b"1", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(cache.get("short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let cache = Cache::memory();
        let other = cache.clone();
        cache.set("k", b"v", None).await.unwrap();
        assert_eq!(other.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
