use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DocumentId, Fingerprint, JobId, UserId, WorkerId};

/// How a worker's synthesis attempt concluded. The absence of audio bytes
/// in a successful attempt (`Skipped`) is distinguished from `Error` so
/// the result consumer can tell "produced nothing on purpose" from
/// "failed".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Outcome {
    Success { audio_bytes: Vec<u8>, duration_ms: u64 },
    Skipped,
    /// `retryable` carries the adapter's own `SynthesisError::{Retryable,Permanent}`
    /// discriminant through to the result consumer, since `message` alone
    /// (already flattened to a display string) can't be reclassified
    /// reliably from substring content.
    Error { message: String, retryable: bool },
}

/// Emitted by a worker (or the overflow scanner) to the shared result
/// list. One record per job attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub job_id: JobId,
    pub fingerprint: Fingerprint,
    pub user_id: UserId,
    pub document_id: DocumentId,
    pub block_idx: u32,
    pub model_slug: String,
    pub voice_slug: String,
    pub codec: String,
    pub text_len: usize,
    pub worker_id: WorkerId,
    pub processing_ms: u64,
    pub outcome: Outcome,
}

/// Categorizes a model for usage accounting. New model tiers are added
/// here rather than threaded through as free-form strings, so the
/// billing consumer's match stays exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelTier {
    ServerKokoro,
    PremiumVoice,
}

impl ModelTier {
    /// Usage multiplier applied to character count for this tier.
    pub fn usage_multiplier(self) -> f64 {
        match self {
            ModelTier::ServerKokoro => 1.0,
            ModelTier::PremiumVoice => 2.5,
        }
    }

    pub fn for_model_slug(model_slug: &str) -> Self {
        match model_slug {
            "kokoro" | "piper" => ModelTier::ServerKokoro,
            _ => ModelTier::PremiumVoice,
        }
    }
}

/// Emitted by the result consumer on successful finalization; drained by
/// the billing consumer on a separate connection pool. Carries everything
/// needed for persistent-store writes so the billing consumer never has
/// to look anything else up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingEvent {
    pub fingerprint: Fingerprint,
    pub user_id: UserId,
    pub model_slug: String,
    pub voice_slug: String,
    pub text_len: usize,
    pub model_tier: ModelTier,
    pub usage_multiplier: f64,
    pub duration_ms: u64,
    pub document_id: DocumentId,
    pub block_idx: u32,
    pub cache_ref: String,
}
