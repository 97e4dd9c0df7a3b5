use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, info, instrument, warn};

use crate::backend::QueueBroker;
use crate::error::SynthesisError;
use crate::types::{queue_name_for_model, Outcome, ResultRecord, SynthesisEvent, SynthesisParams, WorkerId};
use crate::QueueResult;

/// The remote elastic compute endpoint a stale queue head gets dispatched
/// to. Mirrors [`crate::adapter::Adapter`]'s synthesize-and-measure shape,
/// but is called synchronously by the scanner rather than pulled from a
/// queue by a standing worker loop — per spec.md §4.9 the overflow path
/// "acts as an additional, slower worker that only pulls when queues back
/// up," not a warm pool.
#[async_trait]
pub trait OverflowEndpoint: Send + Sync {
    async fn run_sync(&self, params: &SynthesisParams) -> Result<(Vec<u8>, u64), SynthesisError>;
}

/// Polls one model's queue head age and promotes it to the configured
/// remote endpoint once it has aged past `overflow_threshold_ms`. Uses the
/// same atomic `queue_claim_head` primitive local workers use, so a job is
/// never processed twice regardless of which side wins the race.
pub struct OverflowScanner<B: QueueBroker> {
    broker: Arc<B>,
    endpoint: Arc<dyn OverflowEndpoint>,
    model_slug: String,
    worker_id: WorkerId,
    overflow_threshold: chrono::Duration,
    scan_interval: Duration,
}

impl<B: QueueBroker> OverflowScanner<B> {
    pub fn new(
        broker: Arc<B>,
        endpoint: Arc<dyn OverflowEndpoint>,
        model_slug: impl Into<String>,
        deployment: impl Into<String>,
        overflow_threshold_ms: u64,
        scan_interval_ms: u64,
    ) -> Self {
        let model_slug = model_slug.into();
        let worker_id = WorkerId::new(deployment, model_slug.clone(), "elastic");
        Self {
            broker,
            endpoint,
            model_slug,
            worker_id,
            overflow_threshold: chrono::Duration::milliseconds(overflow_threshold_ms as i64),
            scan_interval: Duration::from_millis(scan_interval_ms),
        }
    }

    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = interval(self.scan_interval);
        info!(model = %self.model_slug, "overflow scanner starting");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(model = %self.model_slug, "overflow scanner stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.scan_once().await {
                        Ok(true) => info!(model = %self.model_slug, "promoted stale queue head to overflow endpoint"),
                        Ok(false) => debug!(model = %self.model_slug, "no stale queue head"),
                        Err(err) => warn!(model = %self.model_slug, error = %err, "overflow scan failed"),
                    }
                }
            }
        }
    }

    /// Single scan cycle. Returns `true` if a job was dispatched. Public
    /// for tests and operator-triggered manual sweeps.
    #[instrument(skip(self))]
    pub async fn scan_once(&self) -> QueueResult<bool> {
        let queue_name = queue_name_for_model(&self.model_slug);
        let Some((_, score)) = self.broker.queue_peek_head(&queue_name).await? else {
            return Ok(false);
        };
        if Utc::now() - score < self.overflow_threshold {
            return Ok(false);
        }

        // Same atomic primitive a local worker uses to claim: whichever
        // side calls it first wins, and the other observes an empty queue.
        let Some(job) = self.broker.queue_claim_head(&queue_name).await? else {
            return Ok(false);
        };

        let start = std::time::Instant::now();
        let outcome = match self.endpoint.run_sync(&job.params).await {
            Ok((bytes, _)) if bytes.is_empty() => Outcome::Skipped,
            Ok((bytes, duration_ms)) => Outcome::Success { audio_bytes: bytes, duration_ms },
            Err(err) => Outcome::Error { message: err.message().to_string(), retryable: err.is_retryable() },
        };
        let processing_ms = start.elapsed().as_millis() as u64;

        let record = ResultRecord {
            job_id: job.job_id.clone(),
            fingerprint: job.fingerprint.clone(),
            user_id: job.user_id.clone(),
            document_id: job.document_id.clone(),
            block_idx: job.block_idx,
            model_slug: job.model_slug.clone(),
            voice_slug: job.voice_slug.clone(),
            codec: job.params.codec.clone(),
            text_len: job.params.text.len(),
            worker_id: self.worker_id.clone(),
            processing_ms,
            outcome,
        };

        self.broker.emit_event(SynthesisEvent::Overflowed { job_id: record.job_id.clone(), fingerprint: record.fingerprint.clone(), at: Utc::now() });
        self.broker.result_push(record).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBroker;
    use crate::types::{DocumentId, Fingerprint, JobId, SynthesisJob, UserId};

    struct EchoEndpoint;

    #[async_trait]
    impl OverflowEndpoint for EchoEndpoint {
        async fn run_sync(&self, params: &SynthesisParams) -> Result<(Vec<u8>, u64), SynthesisError> {
            Ok((vec![0u8; params.text.len() * 2], params.text.len() as u64 * 10))
        }
    }

    struct FailingEndpoint;

    #[async_trait]
    impl OverflowEndpoint for FailingEndpoint {
        async fn run_sync(&self, _params: &SynthesisParams) -> Result<(Vec<u8>, u64), SynthesisError> {
            Err(SynthesisError::retryable("elastic endpoint unreachable"))
        }
    }

    fn job_with_score(enqueued_at: chrono::DateTime<Utc>) -> SynthesisJob {
        SynthesisJob {
            job_id: JobId::new(),
            fingerprint: Fingerprint::new("fp-overflow".to_string()),
            user_id: UserId::from("u1"),
            document_id: DocumentId::from("d1"),
            block_idx: 4,
            model_slug: "kokoro".to_string(),
            voice_slug: "af_heart".to_string(),
            params: SynthesisParams { text: "hello there".to_string(), speed: 1.0, codec: "pcm".to_string(), options: serde_json::Value::Null },
            enqueued_at,
        }
    }

    #[tokio::test]
    async fn fresh_head_is_left_for_local_workers() {
        let broker = Arc::new(MemoryBroker::new());
        broker.queue_push(&queue_name_for_model("kokoro"), job_with_score(Utc::now()), Utc::now()).await.unwrap();

        let scanner = OverflowScanner::new(broker.clone(), Arc::new(EchoEndpoint), "kokoro", "runpod", 10_000, 1_000);
        let dispatched = scanner.scan_once().await.unwrap();
        assert!(!dispatched);
        assert!(broker.queue_peek_head(&queue_name_for_model("kokoro")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_head_is_promoted_and_tagged_as_overflow() {
        let broker = Arc::new(MemoryBroker::new());
        let stale_at = Utc::now() - chrono::Duration::seconds(12);
        broker.queue_push(&queue_name_for_model("kokoro"), job_with_score(stale_at), stale_at).await.unwrap();

        let scanner = OverflowScanner::new(broker.clone(), Arc::new(EchoEndpoint), "kokoro", "runpod", 10_000, 1_000);
        let dispatched = scanner.scan_once().await.unwrap();
        assert!(dispatched);
        assert!(broker.queue_peek_head(&queue_name_for_model("kokoro")).await.unwrap().is_none());

        let record = broker.result_pop(Duration::from_millis(200)).await.unwrap().unwrap();
        assert!(record.worker_id.is_overflow());
        assert!(matches!(record.outcome, Outcome::Success { .. }));
    }

    #[tokio::test]
    async fn endpoint_failure_produces_an_error_outcome_not_a_panic() {
        let broker = Arc::new(MemoryBroker::new());
        let stale_at = Utc::now() - chrono::Duration::seconds(30);
        broker.queue_push(&queue_name_for_model("kokoro"), job_with_score(stale_at), stale_at).await.unwrap();

        let scanner = OverflowScanner::new(broker.clone(), Arc::new(FailingEndpoint), "kokoro", "runpod", 10_000, 1_000);
        scanner.scan_once().await.unwrap();

        let record = broker.result_pop(Duration::from_millis(200)).await.unwrap().unwrap();
        assert!(matches!(record.outcome, Outcome::Error { .. }));
    }
}
