use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::backend::QueueBroker;
use crate::types::{queue_name_for_model, SynthesisEvent};
use crate::QueueResult;

/// Reclaims processing entries abandoned by a dead worker. Unlike the
/// lease reaper this core is descended from, a reclaimed job is re-queued
/// at its ORIGINAL enqueue timestamp, not `now`: a worker crash must not
/// let a job jump ahead of jobs that were genuinely enqueued later, or a
/// document near the front of a crashed worker's queue could starve
/// documents behind it that were never touched by the crash.
pub struct Reaper<B: QueueBroker> {
    broker: Arc<B>,
    reap_threshold: chrono::Duration,
    scan_interval: Duration,
}

impl<B: QueueBroker> Reaper<B> {
    pub fn new(broker: Arc<B>, reap_threshold_ms: u64, scan_interval_ms: u64) -> Self {
        Self {
            broker,
            reap_threshold: chrono::Duration::milliseconds(reap_threshold_ms as i64),
            scan_interval: Duration::from_millis(scan_interval_ms),
        }
    }

    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = interval(self.scan_interval);
        info!(interval_ms = self.scan_interval.as_millis() as u64, "reaper starting");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("reaper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.reap_once().await {
                        Ok(reclaimed) if reclaimed > 0 => info!(reclaimed, "reclaimed stale processing entries"),
                        Ok(_) => debug!("no stale processing entries"),
                        Err(err) => warn!(error = %err, "reaper scan failed"),
                    }
                }
            }
        }
    }

    /// Single scan cycle. Public for tests and for operator-triggered
    /// manual sweeps.
    pub async fn reap_once(&self) -> QueueResult<usize> {
        let now = Utc::now();
        let entries = self.broker.processing_scan_all().await?;
        let mut reclaimed = 0;

        for (worker_id, job_id, started_at, job) in entries {
            if now - started_at < self.reap_threshold {
                continue;
            }

            self.broker.processing_delete(&worker_id, &job_id).await?;

            // `acquire_singleflight` only actually inserts (and returns `true`)
            // when the lock was absent -- i.e. it had expired. If it is still
            // held, this call is a no-op observation, not a reacquisition.
            let lock_ttl = Duration::from_millis(self.reap_threshold.num_milliseconds().max(1) as u64 * 5);
            let lock_had_expired = self.broker.acquire_singleflight(&job.fingerprint, lock_ttl).await?;
            let has_subscriber = self
                .broker
                .pending_to_job_lookup(&job.user_id, &job.document_id, job.block_idx)
                .await?
                .is_some();

            if lock_had_expired && !has_subscriber {
                debug!(job_id = %job_id, "lock expired and no remaining subscriber after reap, dropping job");
                reclaimed += 1;
                continue;
            }

            self.broker.queue_push(&queue_name_for_model(&job.model_slug), job.clone(), job.enqueued_at).await?;
            self.broker.emit_event(SynthesisEvent::Reaped { job_id: job_id.clone(), worker_id: worker_id.clone(), at: now });
            reclaimed += 1;
        }

        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBroker;
    use crate::types::{DocumentId, Fingerprint, JobId, SynthesisJob, SynthesisParams, UserId, WorkerId};

    fn sample_job(enqueued_at: chrono::DateTime<Utc>) -> SynthesisJob {
        SynthesisJob {
            job_id: JobId::new(),
            fingerprint: Fingerprint::new("fp-reap".to_string()),
            user_id: UserId::from("u1"),
            document_id: DocumentId::from("d1"),
            block_idx: 5,
            model_slug: "kokoro".to_string(),
            voice_slug: "af_heart".to_string(),
            params: SynthesisParams { text: "hi".to_string(), speed: 1.0, codec: "pcm".to_string(), options: serde_json::Value::Null },
            enqueued_at,
        }
    }

    #[tokio::test]
    async fn stale_processing_entry_is_requeued_preserving_original_timestamp() {
        let broker = Arc::new(MemoryBroker::new());
        let original_enqueued_at = Utc::now() - chrono::Duration::seconds(30);
        let job = sample_job(original_enqueued_at);
        broker.pending_add(&job.user_id, &job.document_id, job.block_idx, &job.model_slug, job.job_id.clone()).await.unwrap();

        let worker_id = WorkerId::new("local", "kokoro", "cpu");
        let stale_start = Utc::now() - chrono::Duration::milliseconds(5_000);
        broker.processing_put(&worker_id, job.job_id.clone(), job.clone(), stale_start).await.unwrap();

        let reaper = Reaper::new(broker.clone(), 1_000, 100);
        let reclaimed = reaper.reap_once().await.unwrap();
        assert_eq!(reclaimed, 1);

        let (_, head_score) = broker.queue_peek_head(&queue_name_for_model("kokoro")).await.unwrap().unwrap();
        assert_eq!(head_score, original_enqueued_at);
    }

    #[tokio::test]
    async fn fresh_processing_entries_are_left_alone() {
        let broker = Arc::new(MemoryBroker::new());
        let job = sample_job(Utc::now());
        let worker_id = WorkerId::new("local", "kokoro", "cpu");
        broker.processing_put(&worker_id, job.job_id.clone(), job, Utc::now()).await.unwrap();

        let reaper = Reaper::new(broker.clone(), 60_000, 100);
        let reclaimed = reaper.reap_once().await.unwrap();
        assert_eq!(reclaimed, 0);
    }

    #[tokio::test]
    async fn job_with_no_remaining_subscriber_is_dropped_not_requeued() {
        let broker = Arc::new(MemoryBroker::new());
        let job = sample_job(Utc::now() - chrono::Duration::seconds(10));
        let worker_id = WorkerId::new("local", "kokoro", "cpu");
        broker.processing_put(&worker_id, job.job_id.clone(), job, Utc::now() - chrono::Duration::seconds(5)).await.unwrap();

        let reaper = Reaper::new(broker.clone(), 1_000, 100);
        reaper.reap_once().await.unwrap();

        assert!(broker.queue_peek_head("kokoro").await.unwrap().is_none());
    }
}
