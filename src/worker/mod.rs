//! Local execution engine.
//!
//! Every node runs one [`JobEngine`], whether it currently leads or not:
//! - **Registry**: job definitions keyed by a deterministic id (`job-<name>`)
//! - **Trigger queue**: bounded FIFO of ids; a full queue drops the trigger
//! - **Consumer loop**: dequeues ids and runs each on its own task
//!
//! # Failure isolation
//!
//! A job's logic runs on a dedicated tokio task. Returned errors and panics
//! are both caught where that task is joined and only logged, so a broken
//! job cannot stop the consumer loop or any other running job.
//!
//! # Triggers
//!
//! Triggers come from local callers or from the `PushJob` gRPC adapter.
//! [`command::shell_job`] builds job logic from a shell command line.

pub mod command;
pub mod engine;
pub mod job;
pub mod queue;
pub mod registry;

pub use engine::JobEngine;
pub use job::{job_id_for, Job, JobContext};
