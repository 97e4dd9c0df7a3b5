use thiserror::Error;

/// Result type for audio cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur while storing or fetching cached audio.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("audio not found for fingerprint: {fingerprint}")]
    NotFound { fingerprint: String },

    #[error("store failed for fingerprint {fingerprint}: {reason}")]
    StoreFailed { fingerprint: String, reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("sidecar metadata (de)serialization failed: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    #[error("operation not supported by this backend")]
    Unsupported,
}

impl CacheError {
    pub fn not_found<S: Into<String>>(fingerprint: S) -> Self {
        Self::NotFound {
            fingerprint: fingerprint.into(),
        }
    }

    pub fn store_failed<S: Into<String>>(fingerprint: S, reason: S) -> Self {
        Self::StoreFailed {
            fingerprint: fingerprint.into(),
            reason: reason.into(),
        }
    }
}
