use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument};

use crate::backend::QueueBroker;
use crate::types::{queue_name_for_model, DocumentId, SubscriberEntry, SynthesisEvent, SynthesisJob, UserId};
use crate::QueueResult;

/// Which branch `enqueue_or_subscribe` took for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// This call won the singleflight lock and pushed a queue entry; a
    /// worker will eventually claim it.
    Enqueued,
    /// Another job with the same fingerprint is already in flight; this
    /// call only registered as a subscriber.
    Subscribed,
}

/// Thin orchestration layer over [`QueueBroker`] implementing spec §4.3's
/// `EnqueueOrSubscribe`/`Evict`. `Claim` has no facade here — workers call
/// `queue_pop_min` (a blocking poll with a deadline) and the overflow
/// scanner calls `queue_claim_head` (non-blocking), but both bottom out in
/// the same `pop_front` under the same per-model write lock, so
/// exactly-once claim holds across the two paths regardless of which one
/// wins the race.
pub struct JobQueue<B: QueueBroker> {
    broker: Arc<B>,
    singleflight_ttl: Duration,
}

impl<B: QueueBroker> JobQueue<B> {
    pub fn new(broker: Arc<B>, singleflight_ttl: Duration) -> Self {
        Self { broker, singleflight_ttl }
    }

    /// §4.3 step 1-3: attempt the singleflight lock; on success, push the
    /// job body and its priority-index entry; either way, register the
    /// subscriber and the pending-set/uuid-index entry. The subscriber and
    /// pending writes happen unconditionally because both branches need
    /// them — only the queue push is conditional on winning the lock.
    #[instrument(skip(self, job), fields(fingerprint = %job.fingerprint, job_id = %job.job_id))]
    pub async fn enqueue_or_subscribe(&self, job: SynthesisJob) -> QueueResult<EnqueueOutcome> {
        let subscriber = SubscriberEntry {
            user_id: job.user_id.clone(),
            document_id: job.document_id.clone(),
            block_idx: job.block_idx,
        };

        let acquired = self.broker.acquire_singleflight(&job.fingerprint, self.singleflight_ttl).await?;

        self.broker.subscriber_add(&job.fingerprint, subscriber).await?;
        self.broker
            .pending_add(&job.user_id, &job.document_id, job.block_idx, &job.model_slug, job.job_id.clone())
            .await?;

        if !acquired {
            info!("fingerprint already in flight, subscribed without enqueueing");
            return Ok(EnqueueOutcome::Subscribed);
        }

        self.broker.queue_push(&queue_name_for_model(&job.model_slug), job.clone(), Utc::now()).await?;
        Ok(EnqueueOutcome::Enqueued)
    }

    /// §4.3's `Evict`: for each block index, resolve it to a job via the
    /// pending-to-uuid index, then remove it from its model's queue and
    /// from the pending set. Race-safe against claim: `queue_evict` is a
    /// no-op once a worker's claim has already removed the body, and the
    /// worker's eventual result still flows through the result consumer
    /// normally — the caller is expected to have told the user to ignore
    /// it regardless of whether this returns it as actually-evicted.
    ///
    /// Returns the subset of `block_indices` that were still queued (and
    /// thus genuinely removed) — callers publish an `evicted` status only
    /// for those.
    #[instrument(skip(self, block_indices))]
    pub async fn evict(&self, user_id: &UserId, document_id: &DocumentId, block_indices: &[u32]) -> QueueResult<Vec<u32>> {
        let mut evicted = Vec::new();
        for &block_idx in block_indices {
            let Some((model_slug, job_id)) = self.broker.pending_to_job_lookup(user_id, document_id, block_idx).await? else {
                continue;
            };
            // Best-effort: read the body before evicting so the lifecycle
            // event carries the fingerprint. Not atomic with the evict
            // below, but losing this race only loses telemetry, never
            // correctness -- `queue_evict` alone is the race-safe primitive.
            let queue_name = queue_name_for_model(&model_slug);
            let fingerprint = self.broker.queue_fetch_body(&queue_name, &job_id).await?.map(|job| job.fingerprint);
            let removed = self.broker.queue_evict(&queue_name, &job_id).await?;
            self.broker.pending_remove(user_id, document_id, block_idx).await?;
            if removed {
                if let Some(fingerprint) = fingerprint {
                    self.broker.emit_event(SynthesisEvent::Evicted { job_id, fingerprint, at: chrono::Utc::now() });
                }
                evicted.push(block_idx);
            }
        }
        Ok(evicted)
    }
}
