pub mod client_service;
pub mod coordination_service;
pub mod server;
pub mod worker_service;

pub use server::{serve_coordination, GrpcServer};
