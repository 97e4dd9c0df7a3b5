/// Configuration for the audio cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Absolute max size accepted for a single cached clip (safety guard).
    pub max_audio_bytes: u64,

    /// Fraction of entries considered reclaimable before `vacuum_if_needed`
    /// actually sweeps anything, expressed as a ratio of dead to live bytes.
    pub vacuum_bloat_threshold: f64,

    /// Minimum interval between two vacuum sweeps, regardless of bloat.
    pub vacuum_min_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_audio_bytes: 200 * 1024 * 1024,
            vacuum_bloat_threshold: 0.25,
            vacuum_min_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_audio_bytes(mut self, bytes: u64) -> Self {
        self.max_audio_bytes = bytes;
        self
    }

    pub fn with_vacuum_bloat_threshold(mut self, ratio: f64) -> Self {
        self.vacuum_bloat_threshold = ratio;
        self
    }

    pub fn with_vacuum_min_interval_secs(mut self, secs: u64) -> Self {
        self.vacuum_min_interval_secs = secs;
        self
    }
}
