use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;
use tts_cache::{AudioCache, CachedAudio};

use crate::backend::{BoxStream, QueueBroker};
use crate::fingerprint::compute_fingerprint;
use crate::queue::{EnqueueOutcome, JobQueue};
use crate::types::{DocumentId, Fingerprint, JobId, PubSubMessage, SynthesisJob, SynthesisParams, UserId};
use crate::visibility::VisibilityScanner;
use crate::QueueResult;

/// Outcome of a `Synthesize` call back to the session façade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesizeAck {
    /// Audio already exists for this fingerprint; no queue entry was
    /// created and no billing event will be generated for this call.
    CacheHit { fingerprint: Fingerprint },
    /// This call won the singleflight lock and created the queue entry.
    Queued { fingerprint: Fingerprint, job_id: JobId },
    /// Identical work is already in flight; this call only subscribed.
    Subscribed { fingerprint: Fingerprint },
}

impl SynthesizeAck {
    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            Self::CacheHit { fingerprint } | Self::Queued { fingerprint, .. } | Self::Subscribed { fingerprint } => fingerprint,
        }
    }
}

/// The one seam the (out-of-scope) HTTP/WebSocket façade calls into —
/// spec.md §6's four session-façade-facing operations (`Synthesize`,
/// `CursorMoved`, `FetchAudio`, `Subscribe`), composed over the broker,
/// the job queue, the visibility scanner, and the audio cache. No
/// transport, session, or auth code lives here.
pub struct SynthesisGateway<B: QueueBroker, C: AudioCache> {
    broker: Arc<B>,
    cache: Arc<C>,
    queue: Arc<JobQueue<B>>,
    visibility: Arc<VisibilityScanner<B>>,
}

impl<B: QueueBroker, C: AudioCache> SynthesisGateway<B, C> {
    pub fn new(broker: Arc<B>, cache: Arc<C>, queue: Arc<JobQueue<B>>, visibility: Arc<VisibilityScanner<B>>) -> Self {
        Self { broker, cache, queue, visibility }
    }

    /// §6 `Synthesize`. Checks the audio cache first — a hit never touches
    /// the queue, the singleflight lock, or the billing list (§9's open
    /// question on cross-user cache-hit billing resolves to "no usage
    /// record on the hot path"). On a miss, computes the fingerprint and
    /// enqueues-or-subscribes.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, text), fields(model = %model_slug, voice = %voice_slug, block_idx))]
    pub async fn synthesize(
        &self,
        user_id: UserId,
        document_id: DocumentId,
        block_idx: u32,
        text: String,
        model_slug: String,
        voice_slug: String,
        speed: f64,
        codec: String,
    ) -> QueueResult<SynthesizeAck> {
        let fingerprint = compute_fingerprint(&text, &model_slug, &voice_slug, speed, &codec);

        if self.cache.contains(fingerprint.as_str()).await.unwrap_or(false) {
            return Ok(SynthesizeAck::CacheHit { fingerprint });
        }

        let job = SynthesisJob {
            job_id: JobId::new(),
            fingerprint: fingerprint.clone(),
            user_id,
            document_id,
            block_idx,
            model_slug,
            voice_slug,
            params: SynthesisParams { text, speed, codec, options: serde_json::Value::Null },
            enqueued_at: Utc::now(),
        };
        let job_id = job.job_id.clone();

        match self.queue.enqueue_or_subscribe(job).await? {
            EnqueueOutcome::Enqueued => Ok(SynthesizeAck::Queued { fingerprint, job_id }),
            EnqueueOutcome::Subscribed => Ok(SynthesizeAck::Subscribed { fingerprint }),
        }
    }

    /// §6 `CursorMoved`. Forwarded directly to the visibility scanner,
    /// which both records the cursor and schedules an immediate
    /// reconciliation — this is the path that gives "scrolled far away ->
    /// immediate cancellation" semantics rather than waiting for the next
    /// periodic scan tick.
    pub fn cursor_moved(&self, user_id: UserId, document_id: DocumentId, cursor: u32) {
        self.visibility.cursor_moved(user_id, document_id, cursor);
    }

    /// §6 `FetchAudio`. The session façade translates `/audio/{fingerprint}`
    /// into this call; the core owns nothing about the URL scheme beyond
    /// publishing it in status messages.
    pub async fn fetch_audio(&self, fingerprint: &Fingerprint) -> QueueResult<CachedAudio> {
        Ok(self.cache.fetch(fingerprint.as_str()).await?)
    }

    /// §6 `Subscribe`. Opens the per-`(user_id, document_id)` status
    /// stream a live session reads `PubSubMessage`s from.
    pub fn subscribe(&self, user_id: &UserId, document_id: &DocumentId) -> BoxStream<PubSubMessage> {
        self.broker.subscribe(user_id, document_id)
    }
}
