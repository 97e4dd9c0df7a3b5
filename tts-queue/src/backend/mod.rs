pub mod memory;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;

use crate::types::{
    DocumentId, Fingerprint, JobId, JobStatus, PubSubMessage, ResultRecord, SubscriberEntry,
    SynthesisEvent, SynthesisJob, UserId, WorkerId,
};
use crate::QueueResult;

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// The broker's logical operations, one-to-one with the external
/// interface the spec defines between the gateway and its shared
/// message-broker/key-value store. Every mutation here is meant to be a
/// single atomic primitive (insert-if-absent, pop-min, set-add,
/// hash-delete, list-push) — callers never assume multi-key transactions.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    // --- singleflight ---

    /// Insert-if-absent with TTL. `true` if this call acquired the lock.
    async fn acquire_singleflight(&self, fingerprint: &Fingerprint, ttl: Duration) -> QueueResult<bool>;

    /// Atomic delete. Returns whether the key existed (i.e. whether this
    /// call is the one that releases it, versus finding it already gone).
    async fn release_singleflight(&self, fingerprint: &Fingerprint) -> QueueResult<bool>;

    // --- per-model queue: priority index + body map ---

    async fn queue_push(&self, model_slug: &str, job: SynthesisJob, score: DateTime<Utc>) -> QueueResult<()>;

    /// Atomically removes and returns the lowest-scored job body, or
    /// `None` if the queue is empty within `timeout`.
    async fn queue_pop_min(&self, model_slug: &str, timeout: Duration) -> QueueResult<Option<SynthesisJob>>;

    /// Non-blocking peek at the head without removing it.
    async fn queue_peek_head(&self, model_slug: &str) -> QueueResult<Option<(JobId, DateTime<Utc>)>>;

    async fn queue_fetch_body(&self, model_slug: &str, job_id: &JobId) -> QueueResult<Option<SynthesisJob>>;

    async fn queue_delete_body(&self, model_slug: &str, job_id: &JobId) -> QueueResult<()>;

    /// Atomically removes the head from both the priority index and the
    /// body map, returning it. Used identically by local claim and the
    /// overflow scanner so a job is never processed twice.
    async fn queue_claim_head(&self, model_slug: &str) -> QueueResult<Option<SynthesisJob>>;

    /// Atomically removes a specific job from both the priority index and
    /// the body map, if present. Returns `true` if it was found (and thus
    /// removed) — `false` means a worker already claimed it, in which
    /// case eviction becomes a no-op and the worker's result still flows
    /// normally.
    async fn queue_evict(&self, model_slug: &str, job_id: &JobId) -> QueueResult<bool>;

    // --- pending-to-uuid index ---

    async fn pending_to_job_lookup(&self, user_id: &UserId, document_id: &DocumentId, block_idx: u32) -> QueueResult<Option<(String, JobId)>>;

    // --- subscriber set ---

    async fn subscriber_add(&self, fingerprint: &Fingerprint, entry: SubscriberEntry) -> QueueResult<()>;

    /// Atomically reads then clears the subscriber set.
    async fn subscriber_drain(&self, fingerprint: &Fingerprint) -> QueueResult<Vec<SubscriberEntry>>;

    // --- pending set ---

    async fn pending_add(&self, user_id: &UserId, document_id: &DocumentId, block_idx: u32, model_slug: &str, job_id: JobId) -> QueueResult<()>;

    async fn pending_remove(&self, user_id: &UserId, document_id: &DocumentId, block_idx: u32) -> QueueResult<()>;

    async fn pending_list(&self, user_id: &UserId, document_id: &DocumentId) -> QueueResult<Vec<u32>>;

    // --- processing entries ---

    async fn processing_put(&self, worker_id: &WorkerId, job_id: JobId, job: SynthesisJob, started_at: DateTime<Utc>) -> QueueResult<()>;

    async fn processing_scan(&self, worker_id: &WorkerId) -> QueueResult<Vec<(JobId, DateTime<Utc>, SynthesisJob)>>;

    /// Scans processing entries across all workers — used by the reaper,
    /// which does not know in advance which workers are alive.
    async fn processing_scan_all(&self) -> QueueResult<Vec<(WorkerId, JobId, DateTime<Utc>, SynthesisJob)>>;

    async fn processing_delete(&self, worker_id: &WorkerId, job_id: &JobId) -> QueueResult<()>;

    // --- result / billing lists ---

    async fn result_push(&self, record: ResultRecord) -> QueueResult<()>;

    async fn result_pop(&self, timeout: Duration) -> QueueResult<Option<ResultRecord>>;

    async fn billing_push(&self, event: crate::types::BillingEvent) -> QueueResult<()>;

    async fn billing_pop(&self, timeout: Duration) -> QueueResult<Option<crate::types::BillingEvent>>;

    // --- pub/sub ---

    async fn publish(&self, user_id: &UserId, document_id: &DocumentId, message: PubSubMessage) -> QueueResult<()>;

    fn subscribe(&self, user_id: &UserId, document_id: &DocumentId) -> BoxStream<PubSubMessage>;

    // --- job status (observability / debugging) ---

    async fn job_status(&self, job_id: &JobId) -> QueueResult<Option<JobStatus>>;

    /// Internal observability event stream.
    fn event_stream(&self) -> BoxStream<SynthesisEvent>;

    /// Publishes an internal lifecycle event for [`MetricsCollector`](crate::observability::MetricsCollector)
    /// consumption. Callers (the worker, result consumer, reaper, overflow
    /// scanner, job queue) hold the context — fingerprint, worker id,
    /// subscriber count — `event_stream()` alone cannot reconstruct, so
    /// they emit directly rather than the broker inferring events from its
    /// own primitive calls. Best-effort: a lagging/closed event stream
    /// never affects the synthesis path itself.
    fn emit_event(&self, event: SynthesisEvent);
}
