//! relayd: at-least-once job delivery over Redis.
//!
//! Producers submit opaque units of work through the HTTP gateway; a
//! pool of workers claims and executes them with bounded retries; a
//! reconciliation watchdog recovers jobs whose worker crashed or hung.
//! Terminally failed jobs land in a dead letter store.

pub mod api;
pub mod cli;
pub mod config;
pub mod job;
pub mod reconciler;
pub mod store;
pub mod worker;

// Re-export the types most callers need
pub use config::Config;
pub use job::{DeadLetterEntry, Envelope, JobRecord, JobStatus};
pub use store::StoreError;
