use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{AudioCache, CacheError, CacheRef, CacheResult, CachedAudio, VacuumReport};

struct Entry {
    codec: String,
    bytes: Vec<u8>,
    stored_at: chrono::DateTime<chrono::Utc>,
}

/// In-memory cache backend. Entries live only as long as the process —
/// suited to tests and to a single gateway replica's local audio cache,
/// not to the durable content-addressed store the fleet shares.
#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioCache for MemoryCache {
    async fn store(&self, fingerprint: &str, bytes: Vec<u8>, codec: &str) -> CacheResult<CacheRef> {
        let stored_at = Utc::now();
        let size_bytes = bytes.len() as u64;
        self.entries.write().insert(
            fingerprint.to_string(),
            Entry {
                codec: codec.to_string(),
                bytes,
                stored_at,
            },
        );
        Ok(CacheRef {
            fingerprint: fingerprint.to_string(),
            codec: codec.to_string(),
            size_bytes,
            stored_at,
        })
    }

    async fn fetch(&self, fingerprint: &str) -> CacheResult<CachedAudio> {
        let entries = self.entries.read();
        let entry = entries
            .get(fingerprint)
            .ok_or_else(|| CacheError::not_found(fingerprint))?;
        Ok(CachedAudio {
            fingerprint: fingerprint.to_string(),
            codec: entry.codec.clone(),
            bytes: entry.bytes.clone(),
            stored_at: entry.stored_at,
        })
    }

    async fn contains(&self, fingerprint: &str) -> CacheResult<bool> {
        Ok(self.entries.read().contains_key(fingerprint))
    }

    async fn remove(&self, fingerprint: &str) -> CacheResult<()> {
        self.entries.write().remove(fingerprint);
        Ok(())
    }

    async fn vacuum_if_needed(&self) -> CacheResult<VacuumReport> {
        // Nothing to reclaim: the map holds exactly the live set.
        Ok(VacuumReport::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_fetch_roundtrips() {
        let cache = MemoryCache::new();
        let cache_ref = cache.store("fp1", b"hello".to_vec(), "pcm").await.unwrap();
        assert_eq!(cache_ref.size_bytes, 5);

        let fetched = cache.fetch("fp1").await.unwrap();
        assert_eq!(fetched.bytes, b"hello");
        assert_eq!(fetched.codec, "pcm");
    }

    #[tokio::test]
    async fn fetch_missing_is_not_found() {
        let cache = MemoryCache::new();
        let err = cache.fetch("missing").await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let cache = MemoryCache::new();
        cache.store("fp1", b"hello".to_vec(), "pcm").await.unwrap();
        cache.remove("fp1").await.unwrap();
        cache.remove("fp1").await.unwrap();
        assert!(!cache.contains("fp1").await.unwrap());
    }

    #[tokio::test]
    async fn repeat_store_for_same_fingerprint_overwrites_safely() {
        let cache = MemoryCache::new();
        cache.store("fp1", b"first".to_vec(), "pcm").await.unwrap();
        cache.store("fp1", b"first".to_vec(), "pcm").await.unwrap();
        let fetched = cache.fetch("fp1").await.unwrap();
        assert_eq!(fetched.bytes, b"first");
    }
}
