/// The six knobs the core reads directly. Everything else (retry policy,
/// model-specific parameters, auth, billing *rules*) lives outside the
/// core's configuration surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Blocks before the cursor kept in the visibility window.
    pub visibility_back: u32,
    /// Blocks after the cursor kept in the visibility window.
    pub visibility_forward: u32,
    /// Queue head age, in milliseconds, before promotion to the overflow
    /// endpoint.
    pub overflow_threshold_ms: u64,
    /// Processing-entry age, in milliseconds, before the reaper reclaims
    /// it.
    pub reap_threshold_ms: u64,
    /// TTL on the singleflight dedup lock; a safety net against leaks if
    /// a result consumer crashes before releasing it.
    pub singleflight_ttl_ms: u64,
    /// Cadence of the visibility, overflow, and reaper scan loops.
    pub scan_interval_ms: u64,
    /// How long a worker's `claim` call blocks before returning empty.
    pub worker_poll_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            visibility_back: 8,
            visibility_forward: 16,
            overflow_threshold_ms: 10_000,
            reap_threshold_ms: 60_000,
            singleflight_ttl_ms: 300_000,
            scan_interval_ms: 1_000,
            worker_poll_timeout_ms: 5_000,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visibility_window(mut self, back: u32, forward: u32) -> Self {
        self.visibility_back = back;
        self.visibility_forward = forward;
        self
    }

    pub fn with_overflow_threshold_ms(mut self, ms: u64) -> Self {
        self.overflow_threshold_ms = ms;
        self
    }

    pub fn with_reap_threshold_ms(mut self, ms: u64) -> Self {
        self.reap_threshold_ms = ms;
        self
    }

    pub fn with_singleflight_ttl_ms(mut self, ms: u64) -> Self {
        self.singleflight_ttl_ms = ms;
        self
    }

    pub fn with_scan_interval_ms(mut self, ms: u64) -> Self {
        self.scan_interval_ms = ms;
        self
    }

    pub fn with_worker_poll_timeout_ms(mut self, ms: u64) -> Self {
        self.worker_poll_timeout_ms = ms;
        self
    }
}
