use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{error, info, instrument, warn};

use crate::backend::QueueBroker;
use crate::types::BillingEvent;
use crate::QueueResult;

/// Cold-path persistence seam. A real deployment backs this with Postgres
/// (sqlx, its own pool, `pool_size=2` mirroring the original's
/// connection budget so a ledger write never competes with the request
/// path for connections); tests and the in-process demo use
/// [`InMemoryLedger`].
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Updates the variant's recorded duration and cache reference. Keyed
    /// by fingerprint, not job id — a variant outlives any single job.
    async fn update_variant_metadata(&self, fingerprint: &str, duration_ms: u64, cache_ref: &str) -> anyhow::Result<()>;

    /// Appends one usage-ledger row. `characters_used` is already
    /// multiplier-adjusted.
    async fn record_usage(&self, user_id: &str, model_tier: &str, characters_used: u64, reference_id: &str) -> anyhow::Result<()>;

    /// Upserts the user's per-voice, per-month engagement counters.
    async fn upsert_voice_stats(&self, user_id: &str, voice_slug: &str, model_slug: &str, month: &str, characters: u64, duration_ms: u64) -> anyhow::Result<()>;
}

/// Month bucket, formatted `YYYY-MM`, as the first-of-month key the
/// original schema groups engagement stats by.
fn month_bucket(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

#[derive(Debug, Clone, Default, PartialEq)]
struct VoiceStatsRow {
    total_characters: u64,
    total_duration_ms: u64,
    synth_count: u64,
}

/// Reference persistence backend standing in for Postgres. Not meant for
/// production use — `tts-queue` never ships a database driver itself, it
/// ships the seam (`PersistentStore`) a deployment wires in.
#[derive(Default)]
pub struct InMemoryLedger {
    variant_metadata: Mutex<HashMap<String, (u64, String)>>,
    usage_log: Mutex<Vec<(String, String, u64, String)>>,
    voice_stats: Mutex<HashMap<(String, String, String, String), VoiceStatsRow>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn usage_total_for(&self, user_id: &str) -> u64 {
        self.usage_log.lock().iter().filter(|(uid, ..)| uid == user_id).map(|(_, _, amount, _)| *amount).sum()
    }

    pub fn voice_stats_for(&self, user_id: &str, voice_slug: &str, model_slug: &str, month: &str) -> Option<(u64, u64, u64)> {
        self.voice_stats
            .lock()
            .get(&(user_id.to_string(), voice_slug.to_string(), model_slug.to_string(), month.to_string()))
            .map(|row| (row.total_characters, row.total_duration_ms, row.synth_count))
    }
}

#[async_trait]
impl PersistentStore for InMemoryLedger {
    async fn update_variant_metadata(&self, fingerprint: &str, duration_ms: u64, cache_ref: &str) -> anyhow::Result<()> {
        self.variant_metadata.lock().insert(fingerprint.to_string(), (duration_ms, cache_ref.to_string()));
        Ok(())
    }

    async fn record_usage(&self, user_id: &str, model_tier: &str, characters_used: u64, reference_id: &str) -> anyhow::Result<()> {
        self.usage_log.lock().push((user_id.to_string(), model_tier.to_string(), characters_used, reference_id.to_string()));
        Ok(())
    }

    async fn upsert_voice_stats(&self, user_id: &str, voice_slug: &str, model_slug: &str, month: &str, characters: u64, duration_ms: u64) -> anyhow::Result<()> {
        let key = (user_id.to_string(), voice_slug.to_string(), model_slug.to_string(), month.to_string());
        let mut stats = self.voice_stats.lock();
        let row = stats.entry(key).or_default();
        row.total_characters += characters;
        row.total_duration_ms += duration_ms;
        row.synth_count += 1;
        Ok(())
    }
}

/// Drains the billing list on its own persistence seam, serially. The
/// original runs this single-threaded per process precisely to avoid
/// `FOR UPDATE` lock contention on the usage ledger; we keep the same
/// shape even though the in-memory store has no lock contention to avoid.
pub struct BillingConsumer<B: QueueBroker, S: PersistentStore> {
    broker: Arc<B>,
    store: Arc<S>,
    poll_timeout: Duration,
    max_retries: u32,
    dead_letter: Mutex<Vec<BillingEvent>>,
}

impl<B: QueueBroker, S: PersistentStore> BillingConsumer<B, S> {
    pub fn new(broker: Arc<B>, store: Arc<S>, poll_timeout: Duration) -> Self {
        Self { broker, store, poll_timeout, max_retries: 3, dead_letter: Mutex::new(Vec::new()) }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        info!("billing consumer starting");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("billing consumer stopping");
                    break;
                }
                outcome = self.drain_one() => {
                    if let Err(err) = outcome {
                        warn!(error = %err, "billing consumer iteration error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    async fn drain_one(&self) -> QueueResult<()> {
        let Some(event) = self.broker.billing_pop(self.poll_timeout).await? else {
            return Ok(());
        };
        self.process_with_retry(event).await;
        Ok(())
    }

    #[instrument(skip(self, event), fields(fingerprint = %event.fingerprint, user_id = %event.user_id))]
    async fn process_with_retry(&self, event: BillingEvent) {
        let mut attempt = 0;
        loop {
            match self.process(&event).await {
                Ok(()) => return,
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_retries {
                        error!(error = %err, attempt, "billing event exhausted retries, parking on dead letter list");
                        self.dead_letter.lock().push(event);
                        return;
                    }
                    warn!(error = %err, attempt, "billing event failed, retrying with backoff");
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
            }
        }
    }

    async fn process(&self, event: &BillingEvent) -> anyhow::Result<()> {
        self.store.update_variant_metadata(event.fingerprint.as_str(), event.duration_ms, &event.cache_ref).await?;

        let characters_used = (event.text_len as f64 * event.usage_multiplier) as u64;
        let tier_label = match event.model_tier {
            crate::types::ModelTier::ServerKokoro => "server_kokoro",
            crate::types::ModelTier::PremiumVoice => "premium_voice",
        };
        self.store.record_usage(&event.user_id.0, tier_label, characters_used, event.fingerprint.as_str()).await?;

        let month = month_bucket(Utc::now());
        self.store
            .upsert_voice_stats(&event.user_id.0, &event.voice_slug, &event.model_slug, &month, characters_used, event.duration_ms)
            .await?;

        Ok(())
    }

    /// Events that exhausted retries without succeeding. A deployment's
    /// operator tooling drains this periodically; the core itself never
    /// retries a dead-lettered event automatically.
    pub fn dead_letter_count(&self) -> usize {
        self.dead_letter.lock().len()
    }

    pub fn take_dead_letters(&self) -> Vec<BillingEvent> {
        std::mem::take(&mut self.dead_letter.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBroker;
    use crate::types::{DocumentId, Fingerprint, ModelTier, UserId};

    fn sample_event() -> BillingEvent {
        BillingEvent {
            fingerprint: Fingerprint::new("fp-bill".to_string()),
            user_id: UserId::from("u1"),
            model_slug: "kokoro".to_string(),
            voice_slug: "af_heart".to_string(),
            text_len: 100,
            model_tier: ModelTier::ServerKokoro,
            usage_multiplier: 1.0,
            duration_ms: 500,
            document_id: DocumentId::from("d1"),
            block_idx: 2,
            cache_ref: "/audio/fp-bill".to_string(),
        }
    }

    #[tokio::test]
    async fn processing_an_event_updates_usage_and_voice_stats() {
        let broker = Arc::new(MemoryBroker::new());
        let store = Arc::new(InMemoryLedger::new());
        let consumer = BillingConsumer::new(broker, store.clone(), Duration::from_millis(50));

        consumer.process(&sample_event()).await.unwrap();

        assert_eq!(store.usage_total_for("u1"), 100);
        let month = month_bucket(Utc::now());
        let stats = store.voice_stats_for("u1", "af_heart", "kokoro", &month).unwrap();
        assert_eq!(stats, (100, 500, 1));
    }

    #[tokio::test]
    async fn repeated_events_accumulate_voice_stats() {
        let store = Arc::new(InMemoryLedger::new());
        let broker = Arc::new(MemoryBroker::new());
        let consumer = BillingConsumer::new(broker, store.clone(), Duration::from_millis(50));

        consumer.process(&sample_event()).await.unwrap();
        consumer.process(&sample_event()).await.unwrap();

        let month = month_bucket(Utc::now());
        let stats = store.voice_stats_for("u1", "af_heart", "kokoro", &month).unwrap();
        assert_eq!(stats, (200, 1000, 2));
    }

    struct AlwaysFailingStore;

    #[async_trait]
    impl PersistentStore for AlwaysFailingStore {
        async fn update_variant_metadata(&self, _fingerprint: &str, _duration_ms: u64, _cache_ref: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("connection refused"))
        }
        async fn record_usage(&self, _user_id: &str, _model_tier: &str, _characters_used: u64, _reference_id: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("connection refused"))
        }
        async fn upsert_voice_stats(&self, _user_id: &str, _voice_slug: &str, _model_slug: &str, _month: &str, _characters: u64, _duration_ms: u64) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn exhausted_retries_land_the_event_on_the_dead_letter_list() {
        let broker = Arc::new(MemoryBroker::new());
        let store = Arc::new(AlwaysFailingStore);
        let consumer = BillingConsumer::new(broker, store, Duration::from_millis(10)).with_max_retries(2);

        consumer.process_with_retry(sample_event()).await;

        assert_eq!(consumer.dead_letter_count(), 1);
        assert_eq!(consumer.take_dead_letters().len(), 1);
        assert_eq!(consumer.dead_letter_count(), 0);
    }
}
