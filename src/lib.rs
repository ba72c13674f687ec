pub mod config;
pub mod coordination;
pub mod dispatch;
pub mod error;
pub mod grpc;
pub mod node;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("cronlite");
}
