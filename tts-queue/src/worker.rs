use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{oneshot, Semaphore};
use tracing::{error, info, instrument, warn};

use crate::adapter::Adapter;
use crate::backend::QueueBroker;
use crate::types::{queue_name_for_model, Outcome, ResultRecord, SynthesisEvent, WorkerId};
use crate::QueueResult;

/// Pull-loop that claims jobs for one model, invokes a pluggable adapter,
/// and emits a result record. Workers never touch the store, the cache,
/// or the subscriber registry — they are pure transforms from job to
/// result.
pub struct Worker<B: QueueBroker> {
    broker: Arc<B>,
    adapter: Arc<dyn Adapter>,
    worker_id: WorkerId,
    model_slug: String,
    poll_timeout: Duration,
    concurrency: Arc<Semaphore>,
}

/// Handle to a spawned worker loop, carrying a graceful-shutdown sender.
pub struct WorkerHandle {
    shutdown: oneshot::Sender<()>,
    pub join: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.join.await;
    }
}

impl<B: QueueBroker + 'static> Worker<B> {
    pub fn new(broker: Arc<B>, adapter: Arc<dyn Adapter>, worker_id: WorkerId, model_slug: impl Into<String>, poll_timeout: Duration, max_concurrency: usize) -> Self {
        Self {
            broker,
            adapter,
            worker_id,
            model_slug: model_slug.into(),
            poll_timeout,
            concurrency: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(async move {
            info!(model = %self.model_slug, worker = %self.worker_id, "worker loop starting");
            if let Err(err) = self.adapter.initialize().await {
                error!(worker = %self.worker_id, error = %err, "adapter initialization failed, worker exiting");
                return;
            }

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!(worker = %self.worker_id, "worker loop stopping");
                        break;
                    }
                    outcome = self.run_one_iteration() => {
                        if let Err(err) = outcome {
                            warn!(worker = %self.worker_id, error = %err, "worker iteration error");
                        }
                    }
                }
            }
        });
        WorkerHandle { shutdown: shutdown_tx, join }
    }

    /// Single claim-and-dispatch cycle. Public for tests and for callers
    /// that want to drive a worker one iteration at a time rather than via
    /// `spawn`.
    #[instrument(skip(self), fields(worker = %self.worker_id, model = %self.model_slug))]
    pub async fn run_one_iteration(&self) -> QueueResult<()> {
        let queue_name = queue_name_for_model(&self.model_slug);
        let Some(job) = self.broker.queue_pop_min(&queue_name, self.poll_timeout).await? else {
            return Ok(());
        };

        let permit = self.concurrency.clone().acquire_owned().await.map_err(|_| crate::error::QueueError::Internal("worker semaphore closed".to_string()))?;
        let broker = self.broker.clone();
        let adapter = self.adapter.clone();
        let worker_id = self.worker_id.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let job_id = job.job_id.clone();
            let started_at = Utc::now();

            if let Err(err) = broker.processing_put(&worker_id, job_id.clone(), job.clone(), started_at).await {
                error!(job_id = %job_id, error = %err, "failed to write processing entry");
                return;
            }
            broker.emit_event(SynthesisEvent::Claimed { job_id: job_id.clone(), worker_id: worker_id.clone(), at: started_at });

            let start = Instant::now();
            let synth_result = adapter.synthesize(&job.params).await;
            let processing_ms = start.elapsed().as_millis() as u64;

            let outcome = match synth_result {
                Ok(bytes) if bytes.is_empty() => Outcome::Skipped,
                Ok(bytes) => {
                    let duration_ms = adapter.calculate_duration_ms(&bytes, &job.params);
                    Outcome::Success { audio_bytes: bytes, duration_ms }
                }
                Err(err) => Outcome::Error { message: err.message().to_string(), retryable: err.is_retryable() },
            };

            let record = ResultRecord {
                job_id: job_id.clone(),
                fingerprint: job.fingerprint.clone(),
                user_id: job.user_id.clone(),
                document_id: job.document_id.clone(),
                block_idx: job.block_idx,
                model_slug: job.model_slug.clone(),
                voice_slug: job.voice_slug.clone(),
                codec: job.params.codec.clone(),
                text_len: job.params.text.len(),
                worker_id: worker_id.clone(),
                processing_ms,
                outcome,
            };

            if let Err(err) = broker.processing_delete(&worker_id, &job_id).await {
                error!(job_id = %job_id, error = %err, "failed to delete processing entry");
            }

            if let Err(err) = broker.result_push(record).await {
                error!(job_id = %job_id, error = %err, "failed to push result record");
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support::EchoAdapter;
    use crate::backend::memory::MemoryBroker;
    use crate::types::{DocumentId, Fingerprint, JobId, SynthesisJob, SynthesisParams, UserId};

    fn sample_job() -> SynthesisJob {
        SynthesisJob {
            job_id: JobId::new(),
            fingerprint: Fingerprint::new("fp1".to_string()),
            user_id: UserId::from("u1"),
            document_id: DocumentId::from("d1"),
            block_idx: 0,
            model_slug: "kokoro".to_string(),
            voice_slug: "af_heart".to_string(),
            params: SynthesisParams {
                text: "hello world".to_string(),
                speed: 1.0,
                codec: "pcm".to_string(),
                options: serde_json::Value::Null,
            },
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn claimed_job_produces_a_success_result_record() {
        let broker = Arc::new(MemoryBroker::new());
        broker.queue_push(&queue_name_for_model("kokoro"), sample_job(), Utc::now()).await.unwrap();

        let adapter: Arc<dyn Adapter> = Arc::new(EchoAdapter { bytes_per_char: 2 });
        let worker = Worker::new(broker.clone(), adapter, WorkerId::new("local", "kokoro", "cpu"), "kokoro", Duration::from_millis(50), 4);
        worker.run_one_iteration().await.unwrap();

        let record = tokio::time::timeout(Duration::from_secs(1), broker.result_pop(Duration::from_secs(1)))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(matches!(record.outcome, Outcome::Success { .. }));
    }

    #[tokio::test]
    async fn empty_text_produces_skipped_outcome() {
        let broker = Arc::new(MemoryBroker::new());
        let mut job = sample_job();
        job.params.text = String::new();
        broker.queue_push(&queue_name_for_model("kokoro"), job, Utc::now()).await.unwrap();

        let adapter: Arc<dyn Adapter> = Arc::new(EchoAdapter { bytes_per_char: 2 });
        let worker = Worker::new(broker.clone(), adapter, WorkerId::new("local", "kokoro", "cpu"), "kokoro", Duration::from_millis(50), 4);
        worker.run_one_iteration().await.unwrap();

        let record = broker.result_pop(Duration::from_secs(1)).await.unwrap().unwrap();
        assert!(matches!(record.outcome, Outcome::Skipped));
    }

    #[tokio::test]
    async fn empty_queue_iteration_is_a_quiet_no_op() {
        let broker = Arc::new(MemoryBroker::new());
        let adapter: Arc<dyn Adapter> = Arc::new(EchoAdapter { bytes_per_char: 2 });
        let worker = Worker::new(broker, adapter, WorkerId::new("local", "kokoro", "cpu"), "kokoro", Duration::from_millis(10), 4);
        worker.run_one_iteration().await.unwrap();
    }
}
