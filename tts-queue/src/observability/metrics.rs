use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::backend::{BoxStream, QueueBroker};
use crate::types::SynthesisEvent;

/// Atomic counters over the core's internal [`SynthesisEvent`] stream —
/// one counter per variant. Always compiled (not gated behind the
/// `metrics` feature): these are the ambient observability layer, not the
/// user-facing dashboard/pricing surface the spec's Non-goals exclude.
#[derive(Default)]
pub struct LiveMetrics {
    enqueued: AtomicU64,
    subscribed: AtomicU64,
    claimed: AtomicU64,
    finalized: AtomicU64,
    duplicate_dropped: AtomicU64,
    evicted: AtomicU64,
    reaped: AtomicU64,
    overflowed: AtomicU64,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, event: &SynthesisEvent) {
        let counter = match event {
            SynthesisEvent::Enqueued { .. } => &self.enqueued,
            SynthesisEvent::Subscribed { .. } => &self.subscribed,
            SynthesisEvent::Claimed { .. } => &self.claimed,
            SynthesisEvent::Finalized { .. } => &self.finalized,
            SynthesisEvent::DuplicateResultDropped { .. } => &self.duplicate_dropped,
            SynthesisEvent::Evicted { .. } => &self.evicted,
            SynthesisEvent::Reaped { .. } => &self.reaped,
            SynthesisEvent::Overflowed { .. } => &self.overflowed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn subscribed(&self) -> u64 {
        self.subscribed.load(Ordering::Relaxed)
    }

    pub fn claimed(&self) -> u64 {
        self.claimed.load(Ordering::Relaxed)
    }

    pub fn finalized(&self) -> u64 {
        self.finalized.load(Ordering::Relaxed)
    }

    pub fn duplicate_dropped(&self) -> u64 {
        self.duplicate_dropped.load(Ordering::Relaxed)
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    pub fn reaped(&self) -> u64 {
        self.reaped.load(Ordering::Relaxed)
    }

    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Point-in-time snapshot, suitable for a `/metrics`-style exporter. A
    /// Prometheus-backed exporter behind the `metrics` Cargo feature is a
    /// declared-dependency extension point, not yet wired up — see
    /// DESIGN.md.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued(),
            subscribed: self.subscribed(),
            claimed: self.claimed(),
            finalized: self.finalized(),
            duplicate_dropped: self.duplicate_dropped(),
            evicted: self.evicted(),
            reaped: self.reaped(),
            overflowed: self.overflowed(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub subscribed: u64,
    pub claimed: u64,
    pub finalized: u64,
    pub duplicate_dropped: u64,
    pub evicted: u64,
    pub reaped: u64,
    pub overflowed: u64,
}

/// Drains a broker's internal event stream into a [`LiveMetrics`]. Runs
/// until the stream closes (the broker was dropped) or `shutdown`
/// resolves — distinct from every other loop in this crate in that it has
/// no retry-on-error step, since a broadcast stream only ever yields a
/// lagged-item gap (silently skipped by `filter_map` upstream in
/// `QueueBroker::event_stream`) or closes for good.
pub struct MetricsCollector {
    metrics: Arc<LiveMetrics>,
}

impl MetricsCollector {
    pub fn new(metrics: Arc<LiveMetrics>) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &Arc<LiveMetrics> {
        &self.metrics
    }

    pub async fn run<B: QueueBroker>(&self, broker: &B, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut events: BoxStream<SynthesisEvent> = broker.event_stream();
        info!("metrics collector starting");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("metrics collector stopping");
                    break;
                }
                event = events.next() => {
                    match event {
                        Some(event) => self.metrics.record(&event),
                        None => {
                            warn!("event stream closed, metrics collector stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBroker;
    use crate::types::{DocumentId, Fingerprint, JobId, SynthesisJob, SynthesisParams, UserId};
    use std::time::Duration;

    fn job() -> SynthesisJob {
        SynthesisJob {
            job_id: JobId::new(),
            fingerprint: Fingerprint::new("fp1".to_string()),
            user_id: UserId::from("u1"),
            document_id: DocumentId::from("d1"),
            block_idx: 0,
            model_slug: "kokoro".to_string(),
            voice_slug: "af_heart".to_string(),
            params: SynthesisParams { text: "hi".to_string(), speed: 1.0, codec: "pcm".to_string(), options: serde_json::Value::Null },
            enqueued_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn enqueue_event_increments_the_enqueued_counter() {
        let broker = Arc::new(MemoryBroker::new());
        let metrics = Arc::new(LiveMetrics::new());
        let collector = MetricsCollector::new(metrics.clone());
        let (_shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let broker_clone = broker.clone();
        let handle = tokio::spawn(async move { collector.run(broker_clone.as_ref(), shutdown_rx).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.queue_push("kokoro", job(), chrono::Utc::now()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(metrics.enqueued(), 1);
        handle.abort();
    }

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let metrics = LiveMetrics::new();
        metrics.record(&SynthesisEvent::Evicted {
            job_id: JobId::new(),
            fingerprint: Fingerprint::new("fp1".to_string()),
            at: chrono::Utc::now(),
        });
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.evicted, 1);
        assert_eq!(snapshot.enqueued, 0);
    }
}
