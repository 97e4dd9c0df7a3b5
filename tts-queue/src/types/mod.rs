pub mod events;
pub mod ids;
pub mod job;
pub mod message;
pub mod record;

pub use events::SynthesisEvent;
pub use ids::{DocumentId, Fingerprint, JobId, UserId, WorkerId};
pub use job::{queue_name_for_model, JobStatus, SubscriberEntry, SynthesisJob, SynthesisParams};
pub use message::{classify, PubSubMessage, Status};
pub use record::{BillingEvent, ModelTier, Outcome, ResultRecord};
