use async_trait::async_trait;

use crate::error::SynthesisError;
use crate::types::SynthesisParams;

/// A worker is parameterized by a model slug and an adapter. The adapter
/// is the only place the core tolerates arbitrary per-model parameter
/// bags — workers and the queue never interpret `SynthesisParams::options`
/// themselves, only the adapter does.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Idempotent. May load model weights, warm a cache, open a client
    /// connection. Called once before the worker's first claim.
    async fn initialize(&self) -> Result<(), SynthesisError>;

    /// Produce audio bytes for `params`. May fail with either a
    /// retryable or permanent `SynthesisError` — the worker does not
    /// interpret this distinction itself; it is informational for
    /// adapter-side logging/metrics.
    async fn synthesize(&self, params: &SynthesisParams) -> Result<Vec<u8>, SynthesisError>;

    /// Pure from bytes plus known format; no I/O.
    fn calculate_duration_ms(&self, audio_bytes: &[u8], params: &SynthesisParams) -> u64;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub struct EchoAdapter {
        pub bytes_per_char: usize,
    }

    #[async_trait]
    impl Adapter for EchoAdapter {
        async fn initialize(&self) -> Result<(), SynthesisError> {
            Ok(())
        }

        async fn synthesize(&self, params: &SynthesisParams) -> Result<Vec<u8>, SynthesisError> {
            if params.text.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![0u8; params.text.len() * self.bytes_per_char])
        }

        fn calculate_duration_ms(&self, audio_bytes: &[u8], _params: &SynthesisParams) -> u64 {
            (audio_bytes.len() / 16) as u64
        }
    }
}
