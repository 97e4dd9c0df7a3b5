use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::backend::{BoxStream, QueueBroker};
use crate::error::QueueError;
use crate::types::{
    BillingEvent, DocumentId, Fingerprint, JobId, JobStatus, PubSubMessage, ResultRecord,
    SubscriberEntry, SynthesisEvent, SynthesisJob, UserId, WorkerId,
};
use crate::QueueResult;

#[derive(Default)]
struct ModelQueueState {
    priority: BTreeMap<(DateTime<Utc>, JobId), ()>,
    bodies: HashMap<JobId, SynthesisJob>,
}

impl ModelQueueState {
    fn pop_front(&mut self) -> Option<SynthesisJob> {
        let key = self.priority.keys().next().cloned()?;
        self.priority.remove(&key);
        // the body may already be gone (evicted while queued) -- that's a no-op claim
        self.bodies.remove(&key.1)
    }

    fn remove(&mut self, job_id: &JobId) -> Option<SynthesisJob> {
        let key = self
            .priority
            .keys()
            .find(|(_, id)| id == job_id)
            .cloned();
        if let Some(key) = key {
            self.priority.remove(&key);
        }
        self.bodies.remove(job_id)
    }
}

/// Reference in-memory implementation of [`QueueBroker`]. Suited to tests
/// and to a single-process deployment; a durable backend (Redis/Postgres)
/// is a drop-in behind the same trait (see the `redis`/`postgres` Cargo
/// features, declared but not yet implemented).
pub struct MemoryBroker {
    queues: RwLock<HashMap<String, ModelQueueState>>,
    pending_to_job: RwLock<HashMap<(UserId, DocumentId, u32), (String, JobId)>>,
    pending_sets: RwLock<HashMap<(UserId, DocumentId), BTreeSet<u32>>>,
    subscribers: RwLock<HashMap<Fingerprint, HashSet<SubscriberEntry>>>,
    singleflight: RwLock<HashMap<Fingerprint, DateTime<Utc>>>,
    processing: RwLock<HashMap<WorkerId, HashMap<JobId, (DateTime<Utc>, SynthesisJob)>>>,

    result_tx: mpsc::UnboundedSender<ResultRecord>,
    result_rx: Mutex<mpsc::UnboundedReceiver<ResultRecord>>,
    billing_tx: mpsc::UnboundedSender<BillingEvent>,
    billing_rx: Mutex<mpsc::UnboundedReceiver<BillingEvent>>,

    channels: DashMap<(UserId, DocumentId), broadcast::Sender<PubSubMessage>>,
    events: broadcast::Sender<SynthesisEvent>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (billing_tx, billing_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(1024);

        Self {
            queues: RwLock::new(HashMap::new()),
            pending_to_job: RwLock::new(HashMap::new()),
            pending_sets: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            singleflight: RwLock::new(HashMap::new()),
            processing: RwLock::new(HashMap::new()),
            result_tx,
            result_rx: Mutex::new(result_rx),
            billing_tx,
            billing_rx: Mutex::new(billing_rx),
            channels: DashMap::new(),
            events,
        }
    }

    fn emit(&self, event: SynthesisEvent) {
        let _ = self.events.send(event);
    }

    fn channel_for(&self, user_id: &UserId, document_id: &DocumentId) -> broadcast::Sender<PubSubMessage> {
        self.channels
            .entry((user_id.clone(), document_id.clone()))
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBroker for MemoryBroker {
    async fn acquire_singleflight(&self, fingerprint: &Fingerprint, ttl: Duration) -> QueueResult<bool> {
        let now = Utc::now();
        let mut lock = self.singleflight.write();
        match lock.get(fingerprint) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                lock.insert(fingerprint.clone(), now + chrono::Duration::from_std(ttl).unwrap_or_default());
                Ok(true)
            }
        }
    }

    async fn release_singleflight(&self, fingerprint: &Fingerprint) -> QueueResult<bool> {
        Ok(self.singleflight.write().remove(fingerprint).is_some())
    }

    async fn queue_push(&self, model_slug: &str, job: SynthesisJob, score: DateTime<Utc>) -> QueueResult<()> {
        let job_id = job.job_id.clone();
        let fingerprint = job.fingerprint.clone();
        let mut queues = self.queues.write();
        let state = queues.entry(model_slug.to_string()).or_default();
        state.priority.insert((score, job_id.clone()), ());
        state.bodies.insert(job_id.clone(), job);
        drop(queues);
        self.emit(SynthesisEvent::Enqueued {
            job_id,
            fingerprint,
            queue: model_slug.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn queue_pop_min(&self, model_slug: &str, timeout: Duration) -> QueueResult<Option<SynthesisJob>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut queues = self.queues.write();
                if let Some(state) = queues.get_mut(model_slug) {
                    if let Some(job) = state.pop_front() {
                        return Ok(Some(job));
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(20).min(timeout)).await;
        }
    }

    async fn queue_peek_head(&self, model_slug: &str) -> QueueResult<Option<(JobId, DateTime<Utc>)>> {
        let queues = self.queues.read();
        Ok(queues
            .get(model_slug)
            .and_then(|state| state.priority.keys().next())
            .map(|(score, job_id)| (job_id.clone(), *score)))
    }

    async fn queue_fetch_body(&self, model_slug: &str, job_id: &JobId) -> QueueResult<Option<SynthesisJob>> {
        Ok(self
            .queues
            .read()
            .get(model_slug)
            .and_then(|state| state.bodies.get(job_id))
            .cloned())
    }

    async fn queue_delete_body(&self, model_slug: &str, job_id: &JobId) -> QueueResult<()> {
        if let Some(state) = self.queues.write().get_mut(model_slug) {
            state.bodies.remove(job_id);
        }
        Ok(())
    }

    async fn queue_claim_head(&self, model_slug: &str) -> QueueResult<Option<SynthesisJob>> {
        let mut queues = self.queues.write();
        Ok(queues.get_mut(model_slug).and_then(|state| state.pop_front()))
    }

    async fn queue_evict(&self, model_slug: &str, job_id: &JobId) -> QueueResult<bool> {
        let mut queues = self.queues.write();
        Ok(queues
            .get_mut(model_slug)
            .and_then(|state| state.remove(job_id))
            .is_some())
    }

    async fn pending_to_job_lookup(&self, user_id: &UserId, document_id: &DocumentId, block_idx: u32) -> QueueResult<Option<(String, JobId)>> {
        Ok(self
            .pending_to_job
            .read()
            .get(&(user_id.clone(), document_id.clone(), block_idx))
            .cloned())
    }

    async fn subscriber_add(&self, fingerprint: &Fingerprint, entry: SubscriberEntry) -> QueueResult<()> {
        self.subscribers
            .write()
            .entry(fingerprint.clone())
            .or_default()
            .insert(entry);
        self.emit(SynthesisEvent::Subscribed {
            fingerprint: fingerprint.clone(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn subscriber_drain(&self, fingerprint: &Fingerprint) -> QueueResult<Vec<SubscriberEntry>> {
        Ok(self
            .subscribers
            .write()
            .remove(fingerprint)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default())
    }

    async fn pending_add(&self, user_id: &UserId, document_id: &DocumentId, block_idx: u32, model_slug: &str, job_id: JobId) -> QueueResult<()> {
        self.pending_to_job.write().insert(
            (user_id.clone(), document_id.clone(), block_idx),
            (model_slug.to_string(), job_id),
        );
        self.pending_sets
            .write()
            .entry((user_id.clone(), document_id.clone()))
            .or_default()
            .insert(block_idx);
        Ok(())
    }

    async fn pending_remove(&self, user_id: &UserId, document_id: &DocumentId, block_idx: u32) -> QueueResult<()> {
        self.pending_to_job
            .write()
            .remove(&(user_id.clone(), document_id.clone(), block_idx));
        if let Some(set) = self.pending_sets.write().get_mut(&(user_id.clone(), document_id.clone())) {
            set.remove(&block_idx);
        }
        Ok(())
    }

    async fn pending_list(&self, user_id: &UserId, document_id: &DocumentId) -> QueueResult<Vec<u32>> {
        Ok(self
            .pending_sets
            .read()
            .get(&(user_id.clone(), document_id.clone()))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn processing_put(&self, worker_id: &WorkerId, job_id: JobId, job: SynthesisJob, started_at: DateTime<Utc>) -> QueueResult<()> {
        self.processing
            .write()
            .entry(worker_id.clone())
            .or_default()
            .insert(job_id, (started_at, job));
        Ok(())
    }

    async fn processing_scan(&self, worker_id: &WorkerId) -> QueueResult<Vec<(JobId, DateTime<Utc>, SynthesisJob)>> {
        Ok(self
            .processing
            .read()
            .get(worker_id)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(id, (started_at, job))| (id.clone(), *started_at, job.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn processing_scan_all(&self) -> QueueResult<Vec<(WorkerId, JobId, DateTime<Utc>, SynthesisJob)>> {
        let processing = self.processing.read();
        let mut out = Vec::new();
        for (worker_id, entries) in processing.iter() {
            for (job_id, (started_at, job)) in entries {
                out.push((worker_id.clone(), job_id.clone(), *started_at, job.clone()));
            }
        }
        Ok(out)
    }

    async fn processing_delete(&self, worker_id: &WorkerId, job_id: &JobId) -> QueueResult<()> {
        if let Some(entries) = self.processing.write().get_mut(worker_id) {
            entries.remove(job_id);
        }
        Ok(())
    }

    async fn result_push(&self, record: ResultRecord) -> QueueResult<()> {
        self.result_tx
            .send(record)
            .map_err(|_| QueueError::Internal("result list receiver dropped".to_string()))
    }

    async fn result_pop(&self, timeout: Duration) -> QueueResult<Option<ResultRecord>> {
        let mut rx = self.result_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => Err(QueueError::Internal("result list sender dropped".to_string())),
            Err(_) => Ok(None),
        }
    }

    async fn billing_push(&self, event: BillingEvent) -> QueueResult<()> {
        self.billing_tx
            .send(event)
            .map_err(|_| QueueError::Internal("billing list receiver dropped".to_string()))
    }

    async fn billing_pop(&self, timeout: Duration) -> QueueResult<Option<BillingEvent>> {
        let mut rx = self.billing_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Err(QueueError::Internal("billing list sender dropped".to_string())),
            Err(_) => Ok(None),
        }
    }

    async fn publish(&self, user_id: &UserId, document_id: &DocumentId, message: PubSubMessage) -> QueueResult<()> {
        let _ = self.channel_for(user_id, document_id).send(message);
        Ok(())
    }

    fn subscribe(&self, user_id: &UserId, document_id: &DocumentId) -> BoxStream<PubSubMessage> {
        let rx = self.channel_for(user_id, document_id).subscribe();
        Box::pin(BroadcastStream::new(rx).filter_map(|item| item.ok()))
    }

    async fn job_status(&self, job_id: &JobId) -> QueueResult<Option<JobStatus>> {
        {
            let queues = self.queues.read();
            for state in queues.values() {
                if state.bodies.contains_key(job_id) {
                    return Ok(Some(JobStatus::Enqueued));
                }
            }
        }
        {
            let processing = self.processing.read();
            for (worker_id, entries) in processing.iter() {
                if let Some((started_at, _job)) = entries.get(job_id) {
                    return Ok(Some(JobStatus::Processing {
                        worker_id: worker_id.clone(),
                        started_at: *started_at,
                    }));
                }
            }
        }
        Ok(None)
    }

    fn event_stream(&self) -> BoxStream<SynthesisEvent> {
        let rx = self.events.subscribe();
        Box::pin(BroadcastStream::new(rx).filter_map(|item| item.ok()))
    }

    fn emit_event(&self, event: SynthesisEvent) {
        self.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SynthesisParams;

    fn job(fingerprint: &str, user: &str, doc: &str, block_idx: u32) -> SynthesisJob {
        SynthesisJob {
            job_id: JobId::new(),
            fingerprint: Fingerprint::new(fingerprint.to_string()),
            user_id: UserId::from(user.to_string()),
            document_id: DocumentId::from(doc.to_string()),
            block_idx,
            model_slug: "kokoro".to_string(),
            voice_slug: "af_heart".to_string(),
            params: SynthesisParams {
                text: "hello".to_string(),
                speed: 1.0,
                codec: "pcm".to_string(),
                options: serde_json::Value::Null,
            },
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn singleflight_acquire_is_exclusive_until_released() {
        let broker = MemoryBroker::new();
        let fp = Fingerprint::new("fp1".to_string());
        assert!(broker.acquire_singleflight(&fp, Duration::from_secs(60)).await.unwrap());
        assert!(!broker.acquire_singleflight(&fp, Duration::from_secs(60)).await.unwrap());
        assert!(broker.release_singleflight(&fp).await.unwrap());
        assert!(broker.acquire_singleflight(&fp, Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn release_singleflight_is_idempotent() {
        let broker = MemoryBroker::new();
        let fp = Fingerprint::new("fp1".to_string());
        broker.acquire_singleflight(&fp, Duration::from_secs(60)).await.unwrap();
        assert!(broker.release_singleflight(&fp).await.unwrap());
        assert!(!broker.release_singleflight(&fp).await.unwrap());
    }

    #[tokio::test]
    async fn queue_pop_min_respects_fifo_order() {
        let broker = MemoryBroker::new();
        let j1 = job("fp1", "u1", "d1", 0);
        let j2 = job("fp2", "u1", "d1", 1);
        let id1 = j1.job_id.clone();
        let id2 = j2.job_id.clone();

        broker.queue_push("kokoro", j1, Utc::now()).await.unwrap();
        broker.queue_push("kokoro", j2, Utc::now() + chrono::Duration::milliseconds(1)).await.unwrap();

        let first = broker.queue_pop_min("kokoro", Duration::from_millis(100)).await.unwrap().unwrap();
        let second = broker.queue_pop_min("kokoro", Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(first.job_id, id1);
        assert_eq!(second.job_id, id2);
    }

    #[tokio::test]
    async fn queue_pop_min_times_out_on_empty_queue() {
        let broker = MemoryBroker::new();
        let result = broker.queue_pop_min("kokoro", Duration::from_millis(30)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn evicting_a_queued_job_makes_claim_a_no_op() {
        let broker = MemoryBroker::new();
        let j1 = job("fp1", "u1", "d1", 0);
        let id1 = j1.job_id.clone();
        broker.queue_push("kokoro", j1, Utc::now()).await.unwrap();
        broker.queue_delete_body("kokoro", &id1).await.unwrap();

        let claimed = broker.queue_claim_head("kokoro").await.unwrap();
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn subscriber_drain_empties_the_set() {
        let broker = MemoryBroker::new();
        let fp = Fingerprint::new("fp1".to_string());
        broker
            .subscriber_add(&fp, SubscriberEntry { user_id: UserId::from("u1"), document_id: DocumentId::from("d1"), block_idx: 0 })
            .await
            .unwrap();
        let drained = broker.subscriber_drain(&fp).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert!(broker.subscriber_drain(&fp).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn result_list_is_fifo_across_push_and_pop() {
        let broker = MemoryBroker::new();
        let record = ResultRecord {
            job_id: JobId::new(),
            fingerprint: Fingerprint::new("fp1".to_string()),
            user_id: UserId::from("u1"),
            document_id: DocumentId::from("d1"),
            block_idx: 0,
            model_slug: "kokoro".to_string(),
            voice_slug: "af_heart".to_string(),
            codec: "pcm".to_string(),
            text_len: 5,
            worker_id: WorkerId::new("local", "kokoro", "cpu"),
            processing_ms: 10,
            outcome: crate::types::Outcome::Skipped,
        };
        broker.result_push(record.clone()).await.unwrap();
        let popped = broker.result_pop(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(popped.job_id, record.job_id);
    }

    #[tokio::test]
    async fn publish_then_subscribe_delivers_message() {
        let broker = MemoryBroker::new();
        let user_id = UserId::from("u1");
        let doc_id = DocumentId::from("d1");
        let mut stream = broker.subscribe(&user_id, &doc_id);
        broker
            .publish(&user_id, &doc_id, PubSubMessage::cached("d1", 0, "fp1", "kokoro", "af_heart"))
            .await
            .unwrap();

        let msg = tokio::time::timeout(Duration::from_millis(200), stream.next()).await.unwrap().unwrap();
        match msg {
            PubSubMessage::Status { block_idx, .. } => assert_eq!(block_idx, 0),
            _ => panic!("expected status message"),
        }
    }
}
