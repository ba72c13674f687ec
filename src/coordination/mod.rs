//! Leader election and membership on top of a lease-based backend.
//!
//! A node opens one [`Session`] (a lease renewed every TTL/3). Its
//! registration record and, when leading, the election lock are both bound
//! to that lease, so they disappear together when the node closes the
//! session or stops renewing it.
//!
//! The backend is anything implementing [`CoordinationBackend`]:
//! [`MemoryBackend`] in process, or [`RemoteBackend`] over gRPC against a
//! `cron-lite coordinator` server.

pub mod backend;
pub mod coordinator;
pub mod membership;
pub mod memory;
pub mod remote;
pub mod session;
pub mod timer;

pub use backend::{CoordinationBackend, LeaseId};
pub use coordinator::Coordinator;
pub use membership::{NodeRegistration, NodeStatus};
pub use memory::MemoryBackend;
pub use remote::RemoteBackend;
pub use session::Session;
