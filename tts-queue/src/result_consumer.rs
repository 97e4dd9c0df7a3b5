use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};
use tts_cache::AudioCache;

use crate::backend::QueueBroker;
use crate::types::{classify, BillingEvent, ModelTier, Outcome, PubSubMessage, ResultRecord, SynthesisEvent};
use crate::QueueResult;

/// Hot-path consumer: drains the result list, releases the singleflight
/// lock, writes the cache, fans out status to subscribers, and produces
/// one billing event per successful finalization. Never touches the
/// persistent store directly — that is the billing consumer's job on a
/// separate connection pool, so a slow ledger write never blocks a user
/// waiting on audio.
pub struct ResultConsumer<B: QueueBroker, C: AudioCache> {
    broker: Arc<B>,
    cache: Arc<C>,
    poll_timeout: Duration,
}

impl<B: QueueBroker, C: AudioCache> ResultConsumer<B, C> {
    pub fn new(broker: Arc<B>, cache: Arc<C>, poll_timeout: Duration) -> Self {
        Self { broker, cache, poll_timeout }
    }

    /// Runs until `shutdown` resolves. Safe to run from multiple replicas
    /// concurrently — `result_pop` is a competing-consumer primitive.
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        info!("result consumer starting");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("result consumer stopping");
                    break;
                }
                outcome = self.drain_one() => {
                    if let Err(err) = outcome {
                        warn!(error = %err, "result consumer iteration error");
                    }
                }
            }
        }
    }

    #[instrument(skip(self, record), fields(job_id = %record.job_id, fingerprint = %record.fingerprint))]
    async fn finalize(&self, record: ResultRecord) -> QueueResult<()> {
        // Releasing first, unconditionally: a duplicate finalization for the
        // same fingerprint (two workers raced past a crashed lock holder)
        // must never double-publish or double-bill. `release_singleflight`
        // returning `false` means some other finalization already won;
        // fall through is intentional — we still must notify *our*
        // subscriber, since the subscriber set is drained independently of
        // the lock. What we must not do twice is push a billing event for
        // audio that was already billed.
        let won_release = self.broker.release_singleflight(&record.fingerprint).await?;

        let subscribers = self.broker.subscriber_drain(&record.fingerprint).await?;

        if won_release {
            self.broker.emit_event(SynthesisEvent::Finalized {
                job_id: record.job_id.clone(),
                fingerprint: record.fingerprint.clone(),
                subscriber_count: subscribers.len(),
                at: chrono::Utc::now(),
            });
        } else {
            self.broker.emit_event(SynthesisEvent::DuplicateResultDropped {
                job_id: record.job_id.clone(),
                fingerprint: record.fingerprint.clone(),
                at: chrono::Utc::now(),
            });
        }

        match record.outcome {
            Outcome::Error { message: err_msg, retryable } => {
                let classification = classify_outcome(&err_msg, retryable);
                for sub in &subscribers {
                    let msg = PubSubMessage::error(sub.document_id.0.clone(), sub.block_idx, classification.clone(), record.model_slug.clone(), record.voice_slug.clone());
                    self.broker.publish(&sub.user_id, &sub.document_id, msg).await?;
                    self.broker.pending_remove(&sub.user_id, &sub.document_id, sub.block_idx).await?;
                }
                return Ok(());
            }
            Outcome::Skipped => {
                for sub in &subscribers {
                    let msg = PubSubMessage::skipped(sub.document_id.0.clone(), sub.block_idx, record.model_slug.clone(), record.voice_slug.clone());
                    self.broker.publish(&sub.user_id, &sub.document_id, msg).await?;
                    self.broker.pending_remove(&sub.user_id, &sub.document_id, sub.block_idx).await?;
                }
                return Ok(());
            }
            Outcome::Success { audio_bytes, duration_ms } => {
                let store_result = self.cache.store(record.fingerprint.as_str(), audio_bytes, &record.codec).await;
                let cache_ref = match store_result {
                    Ok(cache_ref) => cache_ref,
                    Err(err) => {
                        error!(error = %err, "audio store failed, surfacing as error to subscribers");
                        for sub in &subscribers {
                            let msg = PubSubMessage::error(sub.document_id.0.clone(), sub.block_idx, "cache_write_failed", record.model_slug.clone(), record.voice_slug.clone());
                            self.broker.publish(&sub.user_id, &sub.document_id, msg).await?;
                            self.broker.pending_remove(&sub.user_id, &sub.document_id, sub.block_idx).await?;
                        }
                        return Ok(());
                    }
                };

                for sub in &subscribers {
                    let msg = PubSubMessage::cached(sub.document_id.0.clone(), sub.block_idx, record.fingerprint.as_str(), record.model_slug.clone(), record.voice_slug.clone());
                    self.broker.publish(&sub.user_id, &sub.document_id, msg).await?;
                    self.broker.pending_remove(&sub.user_id, &sub.document_id, sub.block_idx).await?;
                }

                if won_release {
                    let model_tier = ModelTier::for_model_slug(&record.model_slug);
                    let billing_event = BillingEvent {
                        fingerprint: record.fingerprint.clone(),
                        user_id: record.user_id.clone(),
                        model_slug: record.model_slug.clone(),
                        voice_slug: record.voice_slug.clone(),
                        text_len: record.text_len,
                        model_tier,
                        usage_multiplier: model_tier.usage_multiplier(),
                        duration_ms,
                        document_id: record.document_id.clone(),
                        block_idx: record.block_idx,
                        cache_ref: format!("/audio/{}", cache_ref.fingerprint),
                    };
                    self.broker.billing_push(billing_event).await?;
                } else {
                    info!("duplicate finalization observed, billing event suppressed");
                }
            }
        }

        Ok(())
    }

    async fn drain_one(&self) -> QueueResult<()> {
        let Some(record) = self.broker.result_pop(self.poll_timeout).await? else {
            return Ok(());
        };
        self.finalize(record).await
    }

    /// Pops and finalizes a single queued result, if one is available
    /// within `poll_timeout`. Returns `true` if a record was processed.
    /// Exposed for integration tests and for callers that want to drive
    /// the consumer one record at a time rather than via `run`.
    pub async fn drain_available(&self) -> QueueResult<bool> {
        let Some(record) = self.broker.result_pop(self.poll_timeout).await? else {
            return Ok(false);
        };
        self.finalize(record).await?;
        Ok(true)
    }
}

fn classify_outcome(message: &str, retryable: bool) -> String {
    // `retryable` is the discriminant the adapter itself assigned
    // (`SynthesisError::is_retryable`), carried through `Outcome::Error`
    // rather than re-derived here, so reconstruct the same variant the
    // worker saw and classify that directly.
    let err = if retryable {
        crate::error::SynthesisError::Retryable(message.to_string())
    } else {
        crate::error::SynthesisError::Permanent(message.to_string())
    };
    classify(&err)
}
