//! Leader-to-worker dispatch.
//!
//! [`Dispatcher`] pushes a job to one worker address with a bounded call
//! timeout, reusing connections from an address-keyed [`ChannelPool`].
//! The worker side of the protocol lives in `grpc::worker_service`.

pub mod client;
pub mod pool;

pub use client::{Dispatcher, LogIdGenerator, ACCEPTED};
pub use pool::ChannelPool;
