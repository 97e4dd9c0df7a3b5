//! # tts-queue: synthesis orchestration core
//!
//! Implements the per-model job queue, subscriber fan-out, result/billing
//! consumers, visibility scanner, overflow scanner, and processing-entry
//! reaper that together make up a text-to-speech platform's orchestration
//! core — the part that sits between a user's "synthesize this block"
//! request and a pool of model workers, some local, some on a remote
//! elastic endpoint.
//!
//! The broker — job queues, singleflight locks, subscriber sets, pending
//! sets, pub/sub — is the only shared mutable state; [`backend::QueueBroker`]
//! is the trait boundary a durable implementation (Redis, Postgres) fills
//! in behind the in-memory reference backend this crate ships by default.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tts_queue::backend::memory::MemoryBroker;
//! use tts_queue::queue::JobQueue;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let broker = Arc::new(MemoryBroker::new());
//! let queue = JobQueue::new(broker, Duration::from_secs(300));
//! # }
//! ```

pub mod adapter;
pub mod backend;
pub mod billing_consumer;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod gateway;
pub mod observability;
pub mod overflow;
pub mod queue;
pub mod reaper;
pub mod result_consumer;
pub mod types;
pub mod visibility;
pub mod worker;

pub use adapter::Adapter;
pub use backend::QueueBroker;
pub use billing_consumer::{BillingConsumer, InMemoryLedger, PersistentStore};
pub use config::Config;
pub use error::{QueueError, QueueResult, SynthesisError};
pub use fingerprint::compute_fingerprint;
pub use gateway::{SynthesisGateway, SynthesizeAck};
pub use observability::{LiveMetrics, MetricsCollector, MetricsSnapshot};
pub use overflow::{OverflowEndpoint, OverflowScanner};
pub use queue::{EnqueueOutcome, JobQueue};
pub use reaper::Reaper;
pub use result_consumer::ResultConsumer;
pub use visibility::VisibilityScanner;
pub use worker::{Worker, WorkerHandle};

/// Convenient re-exports for a deployment wiring the whole core together.
pub mod prelude {
    pub use crate::{
        compute_fingerprint, Adapter, BillingConsumer, Config, EnqueueOutcome, InMemoryLedger,
        JobQueue, LiveMetrics, MetricsCollector, OverflowEndpoint, OverflowScanner,
        PersistentStore, QueueBroker, QueueError, QueueResult, Reaper, ResultConsumer,
        SynthesisError, SynthesisGateway, SynthesizeAck, VisibilityScanner, Worker, WorkerHandle,
    };
    pub use crate::types::*;
}
