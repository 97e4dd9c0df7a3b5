use async_trait::async_trait;

use crate::{CacheRef, CacheResult, CachedAudio};

/// Content-addressed audio storage. A fingerprint identifies exactly one
/// piece of audio content, so `store` is safe to call more than once for
/// the same fingerprint (the second call is a wasted write, not a
/// correctness problem) — singleflight dedup upstream keeps this rare.
#[async_trait]
pub trait AudioCache: Send + Sync {
    /// Durably write `bytes` under `fingerprint`. Returns only after the
    /// write is safe to read back.
    async fn store(&self, fingerprint: &str, bytes: Vec<u8>, codec: &str) -> CacheResult<CacheRef>;

    /// Fetch previously stored audio. `CacheError::NotFound` if absent.
    async fn fetch(&self, fingerprint: &str) -> CacheResult<CachedAudio>;

    /// Cheap existence check that doesn't pull bytes off disk.
    async fn contains(&self, fingerprint: &str) -> CacheResult<bool>;

    /// Remove a single entry. Idempotent: removing an absent fingerprint
    /// is not an error.
    async fn remove(&self, fingerprint: &str) -> CacheResult<()>;

    /// Sweep reclaimable space if the backend's bloat threshold has been
    /// crossed. Backends that have nothing to reclaim (e.g. `MemoryCache`)
    /// return a zero-valued report.
    async fn vacuum_if_needed(&self) -> CacheResult<VacuumReport>;
}

/// Outcome of a `vacuum_if_needed` sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VacuumReport {
    pub entries_reclaimed: u64,
    pub bytes_reclaimed: u64,
}
