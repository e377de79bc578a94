//! Ephemeral response cache
//!
//! Holds complete responses keyed by [`RequestKey`]. Entries expire after a
//! TTL and, when a byte limit is set, the least recently used entries are
//! evicted to make room for new ones.

use crate::error::{ProxyError, Result};
use crate::models::{ProxyResponse, RequestKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Keyed store of complete HTTP responses
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Return a stored response, `None` on miss
    async fn lookup(&self, key: &RequestKey) -> Result<Option<ProxyResponse>>;

    /// Store a copy of a response
    async fn put(&self, key: &RequestKey, response: &ProxyResponse) -> Result<()>;
}

/// Cached response entry with expiration and access tracking
#[derive(Clone)]
struct CacheEntry {
    response: ProxyResponse,
    size: usize,
    expires_at: SystemTime,
    last_accessed: SystemTime,
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<RequestKey, CacheEntry>,
    current_size_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// In-memory [`ResponseCache`] with TTL expiry and LRU eviction
pub struct MemoryResponseCache {
    state: RwLock<CacheState>,
    ttl: Duration,
    max_size_bytes: Option<usize>,
}

impl MemoryResponseCache {
    /// Create a cache without a size limit
    pub fn new(ttl: Duration) -> Self {
        MemoryResponseCache {
            state: RwLock::new(CacheState::default()),
            ttl,
            max_size_bytes: None,
        }
    }

    /// Create a cache bounded to `max_size_bytes` (uses LRU eviction)
    pub fn with_max_size(ttl: Duration, max_size_bytes: usize) -> Self {
        MemoryResponseCache {
            state: RwLock::new(CacheState::default()),
            ttl,
            max_size_bytes: Some(max_size_bytes),
        }
    }

    pub fn get_stats(&self) -> CacheStats {
        match self.state.read() {
            Ok(state) => CacheStats {
                total_entries: state.entries.len(),
                total_bytes: state.current_size_bytes,
                hits: state.hits,
                misses: state.misses,
                evictions: state.evictions,
            },
            Err(_) => CacheStats::default(),
        }
    }

    fn poisoned() -> ProxyError {
        ProxyError::storage("response cache lock poisoned")
    }

    /// Approximate in-memory footprint of a response
    fn entry_size(response: &ProxyResponse) -> usize {
        let header_bytes: usize = response
            .headers
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len())
            .sum();
        response.body.len() + header_bytes
    }

    fn cleanup_expired(state: &mut CacheState, now: SystemTime) {
        let mut removed_bytes = 0;
        state.entries.retain(|_, entry| {
            if entry.expires_at <= now {
                removed_bytes += entry.size;
                false
            } else {
                true
            }
        });
        state.current_size_bytes = state.current_size_bytes.saturating_sub(removed_bytes);
    }

    /// Evict least recently used entries until `needed_bytes` are free
    fn evict_lru(state: &mut CacheState, max_size: usize, needed_bytes: usize) {
        let mut entries: Vec<_> = state
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.last_accessed))
            .collect();
        entries.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (key, _) in entries {
            if state.current_size_bytes + needed_bytes <= max_size {
                break;
            }
            if let Some(entry) = state.entries.remove(&key) {
                state.current_size_bytes = state.current_size_bytes.saturating_sub(entry.size);
                state.evictions += 1;
                debug!("LRU eviction: {}", key);
            }
        }
    }
}

#[async_trait]
impl ResponseCache for MemoryResponseCache {
    async fn lookup(&self, key: &RequestKey) -> Result<Option<ProxyResponse>> {
        let now = SystemTime::now();
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;

        let hit = match state.entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_accessed = now;
                Some(entry.response.clone())
            }
            Some(_) => {
                debug!("Cache entry expired: {}", key);
                if let Some(entry) = state.entries.remove(key) {
                    state.current_size_bytes = state.current_size_bytes.saturating_sub(entry.size);
                }
                None
            }
            None => None,
        };

        if hit.is_some() {
            state.hits += 1;
        } else {
            state.misses += 1;
        }
        Ok(hit)
    }

    async fn put(&self, key: &RequestKey, response: &ProxyResponse) -> Result<()> {
        let now = SystemTime::now();
        let size = Self::entry_size(response);
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;

        if let Some(previous) = state.entries.remove(key) {
            state.current_size_bytes = state.current_size_bytes.saturating_sub(previous.size);
        }

        if let Some(max_size) = self.max_size_bytes {
            if size > max_size {
                return Err(ProxyError::storage(format!(
                    "response for {} ({} bytes) exceeds cache size {}",
                    key, size, max_size
                )));
            }
            Self::cleanup_expired(&mut state, now);
            Self::evict_lru(&mut state, max_size, size);
        }

        state.entries.insert(
            key.clone(),
            CacheEntry {
                response: response.clone(),
                size,
                expires_at: now + self.ttl,
                last_accessed: now,
            },
        );
        state.current_size_bytes += size;

        debug!("Cached response: {} ({} bytes)", key, size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};

    fn key(path: &str) -> RequestKey {
        RequestKey::new(&Method::GET, &format!("http://origin{}", path), false)
    }

    #[tokio::test]
    async fn test_put_and_lookup() {
        let cache = MemoryResponseCache::new(Duration::from_secs(60));
        let response = ProxyResponse::new(StatusCode::OK, "body")
            .with_header("content-type", "text/css");

        assert!(cache.lookup(&key("/a.css")).await.unwrap().is_none());
        cache.put(&key("/a.css"), &response).await.unwrap();

        let hit = cache.lookup(&key("/a.css")).await.unwrap().unwrap();
        assert_eq!(hit.body, response.body);
        assert_eq!(hit.header("content-type"), Some("text/css"));

        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = MemoryResponseCache::new(Duration::from_millis(10));
        cache
            .put(&key("/a"), &ProxyResponse::new(StatusCode::OK, "x"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.lookup(&key("/a")).await.unwrap().is_none());
        assert_eq!(cache.get_stats().total_bytes, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = MemoryResponseCache::with_max_size(Duration::from_secs(60), 250);
        cache.put(&key("/1"), &ProxyResponse::new(StatusCode::OK, vec![0u8; 100])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.put(&key("/2"), &ProxyResponse::new(StatusCode::OK, vec![0u8; 100])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Touch /1 so /2 becomes the oldest
        cache.lookup(&key("/1")).await.unwrap();
        cache.put(&key("/3"), &ProxyResponse::new(StatusCode::OK, vec![0u8; 100])).await.unwrap();

        assert!(cache.lookup(&key("/1")).await.unwrap().is_some());
        assert!(cache.lookup(&key("/2")).await.unwrap().is_none());
        assert!(cache.lookup(&key("/3")).await.unwrap().is_some());
        assert_eq!(cache.get_stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_oversized_response_rejected() {
        let cache = MemoryResponseCache::with_max_size(Duration::from_secs(60), 10);
        let result = cache
            .put(&key("/big"), &ProxyResponse::new(StatusCode::OK, vec![0u8; 100]))
            .await;
        assert!(result.is_err());
    }
}
