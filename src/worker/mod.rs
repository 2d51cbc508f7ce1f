//! Webhook processing: a worker pool drains the spool and routes each event
//! to its service, and a job runner executes the background jobs those
//! services queue.
//!
//! - [`dispatch`]: spool scanning, worker pool, retry bookkeeping
//! - [`policy`]: which failures are retried
//! - [`router`]: event to service routing
//! - [`jobs`]: clone and pull request import jobs

pub mod dispatch;
pub mod jobs;
pub mod policy;
pub mod router;

pub use dispatch::{DEFAULT_WORKER_COUNT, DeliveryOutcome, Dispatcher, DispatcherConfig};
pub use jobs::JobRunner;
pub use policy::{FailureAction, classify_failure};
pub use router::EventRouter;
