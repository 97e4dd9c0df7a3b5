use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to audio bytes that have been durably written to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRef {
    pub fingerprint: String,
    pub codec: String,
    pub size_bytes: u64,
    pub stored_at: DateTime<Utc>,
}

/// Audio bytes fetched back out of the cache.
#[derive(Debug, Clone)]
pub struct CachedAudio {
    pub fingerprint: String,
    pub codec: String,
    pub bytes: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

impl CachedAudio {
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}
