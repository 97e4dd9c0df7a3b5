use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DocumentId, Fingerprint, JobId, UserId};

/// Per-model, per-adapter parameter bundle. `options` carries arbitrary
/// model-specific knobs (temperature, reference voices, ...) opaquely —
/// the core never interprets them, only the adapter does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisParams {
    pub text: String,
    pub speed: f64,
    pub codec: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Immutable record describing one unit of synthesis work. A job's
/// fingerprint may be shared across many jobs from different users; its
/// UUID is unique and is never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisJob {
    pub job_id: JobId,
    pub fingerprint: Fingerprint,
    pub user_id: UserId,
    pub document_id: DocumentId,
    pub block_idx: u32,
    pub model_slug: String,
    pub voice_slug: String,
    pub params: SynthesisParams,
    pub enqueued_at: DateTime<Utc>,
}

impl SynthesisJob {
    pub fn queue_name(&self) -> String {
        queue_name_for_model(&self.model_slug)
    }
}

/// Derives a model's queue name from its slug. Pure function: the only
/// ordering key within a queue is the enqueue timestamp, never a
/// priority level.
pub fn queue_name_for_model(model_slug: &str) -> String {
    format!("synthesis:{}", model_slug)
}

/// One live session awaiting a fingerprint's result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberEntry {
    pub user_id: UserId,
    pub document_id: DocumentId,
    pub block_idx: u32,
}

/// State machine for a job. Terminal states: `Finalized`, `Evicted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Enqueued,
    Processing { worker_id: super::WorkerId, started_at: DateTime<Utc> },
    Finalized,
    Evicted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_is_derived_from_model_slug() {
        assert_eq!(queue_name_for_model("kokoro"), "synthesis:kokoro");
    }
}
