use thiserror::Error;
use tonic::Status;

#[derive(Error, Debug)]
pub enum CronError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session lease {0} expired or unknown")]
    LeaseExpired(i64),

    #[error("Not the leader, current leader is {0:?}")]
    NotLeader(Option<String>),

    #[error("No workers available")]
    NoWorkersAvailable,

    #[error("Worker {worker} rejected job with code {code}: {message}")]
    DispatchRejected {
        worker: String,
        code: i32,
        message: String,
    },

    #[error("Dispatch to {worker} timed out after {timeout_ms}ms")]
    DispatchTimeout { worker: String, timeout_ms: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid registration record at {key}: {reason}")]
    InvalidRegistration { key: String, reason: String },

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CronError>;

impl From<CronError> for Status {
    fn from(err: CronError) -> Self {
        match err {
            CronError::LeaseExpired(_) => Status::not_found(err.to_string()),
            CronError::NotLeader(_) => Status::failed_precondition(err.to_string()),
            CronError::NoWorkersAvailable | CronError::Connection(_) => {
                Status::unavailable(err.to_string())
            }
            CronError::DispatchRejected { .. } => Status::aborted(err.to_string()),
            CronError::DispatchTimeout { .. } => Status::deadline_exceeded(err.to_string()),
            CronError::Cancelled => Status::cancelled(err.to_string()),
            CronError::Grpc(status) => status,
            other => Status::internal(other.to_string()),
        }
    }
}
