use tonic::{Request, Response, Status};

use crate::dispatch::ACCEPTED;
use crate::proto::executor_server::Executor;
use crate::proto::{PushJobRequest, PushJobResponse};
use crate::worker::JobEngine;

/// Worker side of `PushJob`: hands the job id to the local engine.
///
/// Always answers 200. A trigger dropped because the local queue is full
/// is not visible here, so the leader sees it as accepted too.
pub struct WorkerService {
    engine: JobEngine,
}

impl WorkerService {
    pub fn new(engine: JobEngine) -> Self {
        Self { engine }
    }
}

#[tonic::async_trait]
impl Executor for WorkerService {
    async fn push_job(
        &self,
        request: Request<PushJobRequest>,
    ) -> Result<Response<PushJobResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(
            job_id = %req.job_id,
            job_name = %req.job_name,
            log_id = req.log_id,
            "Received job"
        );

        self.engine.trigger_job(req.job_id);

        Ok(Response::new(PushJobResponse {
            code: ACCEPTED,
            message: "accepted".to_string(),
        }))
    }
}
