use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;
use tracing::{debug, info, instrument, warn};

use crate::backend::QueueBroker;
use crate::queue::JobQueue;
use crate::types::{DocumentId, PubSubMessage, UserId};
use crate::QueueResult;

/// `[cursor - back, cursor + forward]`, saturating at zero rather than
/// wrapping — a cursor near the start of a document must not make the
/// window's low bound underflow into a huge `u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    low: u32,
    high: u32,
}

impl Window {
    fn around(cursor: u32, back: u32, forward: u32) -> Self {
        Self {
            low: cursor.saturating_sub(back),
            high: cursor.saturating_add(forward),
        }
    }

    fn contains(&self, idx: u32) -> bool {
        idx >= self.low && idx <= self.high
    }
}

/// Tracks each live session's cursor and evicts queued blocks that fall
/// outside the visibility window, per spec.md §4.8. Two trigger paths feed
/// the same reconciliation logic: a fixed-interval scan (catches sessions
/// whose `cursor_moved` event was lost) and the explicit `cursor_moved`
/// call (gives "scrolled far away -> immediate cancellation" semantics).
pub struct VisibilityScanner<B: QueueBroker> {
    broker: Arc<B>,
    queue: Arc<JobQueue<B>>,
    cursors: DashMap<(UserId, DocumentId), u32>,
    visibility_back: u32,
    visibility_forward: u32,
    scan_interval: Duration,
    trigger_tx: mpsc::UnboundedSender<(UserId, DocumentId)>,
    trigger_rx: Mutex<mpsc::UnboundedReceiver<(UserId, DocumentId)>>,
}

impl<B: QueueBroker> VisibilityScanner<B> {
    pub fn new(broker: Arc<B>, queue: Arc<JobQueue<B>>, visibility_back: u32, visibility_forward: u32, scan_interval_ms: u64) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        Self {
            broker,
            queue,
            cursors: DashMap::new(),
            visibility_back,
            visibility_forward,
            scan_interval: Duration::from_millis(scan_interval_ms),
            trigger_tx,
            trigger_rx: Mutex::new(trigger_rx),
        }
    }

    /// Records the session's new cursor and schedules an immediate
    /// reconciliation for this user-document rather than waiting for the
    /// next periodic tick.
    #[instrument(skip(self))]
    pub fn cursor_moved(&self, user_id: UserId, document_id: DocumentId, cursor: u32) {
        self.cursors.insert((user_id.clone(), document_id.clone()), cursor);
        let _ = self.trigger_tx.send((user_id, document_id));
    }

    /// Runs until `shutdown` resolves. Only one caller should ever drive
    /// `run` for a given scanner — the trigger receiver is locked for the
    /// full duration rather than per-iteration, since there is exactly one
    /// reader.
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = interval(self.scan_interval);
        let mut triggers = self.trigger_rx.lock().await;
        info!(interval_ms = self.scan_interval.as_millis() as u64, "visibility scanner starting");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("visibility scanner stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.scan_all().await {
                        warn!(error = %err, "visibility scan failed");
                    }
                }
                Some((user_id, document_id)) = triggers.recv() => {
                    if let Err(err) = self.reconcile(&user_id, &document_id).await {
                        warn!(error = %err, "visibility reconcile failed");
                    }
                }
            }
        }
    }

    /// Reconciles every user-document this scanner has ever seen a cursor
    /// for. Public for tests and operator-triggered manual sweeps.
    pub async fn scan_all(&self) -> QueueResult<usize> {
        let keys: Vec<(UserId, DocumentId)> = self.cursors.iter().map(|entry| entry.key().clone()).collect();
        let mut total = 0;
        for (user_id, document_id) in keys {
            total += self.reconcile(&user_id, &document_id).await?;
        }
        Ok(total)
    }

    async fn reconcile(&self, user_id: &UserId, document_id: &DocumentId) -> QueueResult<usize> {
        let Some(cursor) = self.cursors.get(&(user_id.clone(), document_id.clone())).map(|entry| *entry) else {
            return Ok(0);
        };
        let window = Window::around(cursor, self.visibility_back, self.visibility_forward);

        let pending = self.broker.pending_list(user_id, document_id).await?;
        let outside: Vec<u32> = pending.into_iter().filter(|idx| !window.contains(*idx)).collect();
        if outside.is_empty() {
            debug!(user_id = %user_id, document_id = %document_id, "nothing outside visibility window");
            return Ok(0);
        }

        let evicted = self.queue.evict(user_id, document_id, &outside).await?;
        if evicted.is_empty() {
            return Ok(0);
        }

        self.broker
            .publish(
                user_id,
                document_id,
                PubSubMessage::Evicted {
                    document_id: document_id.0.clone(),
                    block_indices: evicted.clone(),
                },
            )
            .await?;

        Ok(evicted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBroker;
    use crate::types::{queue_name_for_model, Fingerprint, JobId, SynthesisJob, SynthesisParams};
    use tokio_stream::StreamExt;

    fn job(fingerprint: &str, user: &str, doc: &str, block_idx: u32) -> SynthesisJob {
        SynthesisJob {
            job_id: JobId::new(),
            fingerprint: Fingerprint::new(fingerprint.to_string()),
            user_id: UserId::from(user),
            document_id: DocumentId::from(doc),
            block_idx,
            model_slug: "kokoro".to_string(),
            voice_slug: "af_heart".to_string(),
            params: SynthesisParams { text: "hello".to_string(), speed: 1.0, codec: "pcm".to_string(), options: serde_json::Value::Null },
            enqueued_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn window_arithmetic_matches_spec_example() {
        // cursor=25, back=8, forward=16 -> [17, 41]
        let window = Window::around(25, 8, 16);
        assert_eq!(window, Window { low: 17, high: 41 });
        assert!(!window.contains(5));
        assert!(window.contains(17));
        assert!(window.contains(41));
        assert!(!window.contains(42));
    }

    #[test]
    fn window_saturates_rather_than_underflows_near_zero() {
        let window = Window::around(3, 8, 16);
        assert_eq!(window.low, 0);
    }

    #[tokio::test]
    async fn blocks_outside_window_are_evicted_and_reported() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = Arc::new(JobQueue::new(broker.clone(), Duration::from_secs(60)));
        for idx in 0..8u32 {
            queue.enqueue_or_subscribe(job(&format!("fp{idx}"), "u1", "d1", idx)).await.unwrap();
        }

        let scanner = VisibilityScanner::new(broker.clone(), queue, 8, 16, 1_000);
        let mut stream = broker.subscribe(&UserId::from("u1"), &DocumentId::from("d1"));

        scanner.cursor_moved(UserId::from("u1"), DocumentId::from("d1"), 0);
        scanner.reconcile(&UserId::from("u1"), &DocumentId::from("d1")).await.unwrap();
        scanner.cursor_moved(UserId::from("u1"), DocumentId::from("d1"), 25);
        let reconciled = scanner.reconcile(&UserId::from("u1"), &DocumentId::from("d1")).await.unwrap();
        assert_eq!(reconciled, 8);

        let msg = tokio::time::timeout(Duration::from_secs(1), stream.next()).await.unwrap().unwrap();
        match msg {
            PubSubMessage::Evicted { block_indices, .. } => {
                assert_eq!(block_indices.len(), 8);
            }
            _ => panic!("expected evicted message"),
        }
    }

    #[tokio::test]
    async fn blocks_inside_window_are_left_alone() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = Arc::new(JobQueue::new(broker.clone(), Duration::from_secs(60)));
        queue.enqueue_or_subscribe(job("fp1", "u1", "d1", 10)).await.unwrap();

        let scanner = VisibilityScanner::new(broker.clone(), queue, 8, 16, 1_000);
        scanner.cursor_moved(UserId::from("u1"), DocumentId::from("d1"), 5);
        let reconciled = scanner.reconcile(&UserId::from("u1"), &DocumentId::from("d1")).await.unwrap();
        assert_eq!(reconciled, 0);
        assert!(broker.queue_peek_head(&queue_name_for_model("kokoro")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn already_claimed_block_is_not_reported_as_evicted() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = Arc::new(JobQueue::new(broker.clone(), Duration::from_secs(60)));
        queue.enqueue_or_subscribe(job("fp1", "u1", "d1", 0)).await.unwrap();
        broker.queue_claim_head(&queue_name_for_model("kokoro")).await.unwrap();

        let scanner = VisibilityScanner::new(broker.clone(), queue, 8, 16, 1_000);
        scanner.cursor_moved(UserId::from("u1"), DocumentId::from("d1"), 100);
        let reconciled = scanner.reconcile(&UserId::from("u1"), &DocumentId::from("d1")).await.unwrap();
        assert_eq!(reconciled, 0);
    }
}
