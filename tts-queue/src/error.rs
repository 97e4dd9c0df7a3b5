use thiserror::Error;

/// Result type for queue/broker operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure-level errors: broker connectivity, serialization,
/// backend capability mismatches. Every loop retries these with backoff;
/// they never change job state directly because all broker operations
/// are atomic.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("broker connection error: {0}")]
    Broker(String),

    #[error("broker call timed out")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend does not support feature: {0}")]
    BackendUnsupported(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tts_cache::CacheError> for QueueError {
    fn from(err: tts_cache::CacheError) -> Self {
        Self::Cache(err.to_string())
    }
}

/// Outcome of a worker's adapter invocation. Mirrors the job-error
/// taxonomy: retryable errors are surfaced to the user as `error` status
/// (the spec does not auto-retry jobs — retry is a user action), while
/// permanent errors are identical in effect but named separately so
/// adapters can distinguish "transient model backend hiccup" from
/// "malformed request" in their own logs.
#[derive(Error, Debug, Clone)]
pub enum SynthesisError {
    #[error("retryable synthesis error: {0}")]
    Retryable(String),

    #[error("permanent synthesis error: {0}")]
    Permanent(String),
}

impl SynthesisError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}
