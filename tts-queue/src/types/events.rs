use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Fingerprint, JobId, WorkerId};

/// Internal observability event stream. Distinct from [`super::message::PubSubMessage`]:
/// this is for operators watching the core, not for end users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SynthesisEvent {
    Enqueued { job_id: JobId, fingerprint: Fingerprint, queue: String, at: DateTime<Utc> },
    Subscribed { fingerprint: Fingerprint, at: DateTime<Utc> },
    Claimed { job_id: JobId, worker_id: WorkerId, at: DateTime<Utc> },
    Finalized { job_id: JobId, fingerprint: Fingerprint, subscriber_count: usize, at: DateTime<Utc> },
    DuplicateResultDropped { job_id: JobId, fingerprint: Fingerprint, at: DateTime<Utc> },
    Evicted { job_id: JobId, fingerprint: Fingerprint, at: DateTime<Utc> },
    Reaped { job_id: JobId, worker_id: WorkerId, at: DateTime<Utc> },
    Overflowed { job_id: JobId, fingerprint: Fingerprint, at: DateTime<Utc> },
}

impl SynthesisEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Subscribed { .. } => "subscribed",
            Self::Claimed { .. } => "claimed",
            Self::Finalized { .. } => "finalized",
            Self::DuplicateResultDropped { .. } => "duplicate_result_dropped",
            Self::Evicted { .. } => "evicted",
            Self::Reaped { .. } => "reaped",
            Self::Overflowed { .. } => "overflowed",
        }
    }
}
