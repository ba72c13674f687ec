use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

use crate::proto::scheduler_service_server::SchedulerService;
use crate::proto::{
    GetClusterStatusRequest, GetClusterStatusResponse, JobInfo, ListJobsRequest,
    ListJobsResponse, NodeInfo, TriggerJobRequest, TriggerJobResponse,
};
use crate::scheduler::LeaderScheduler;
use crate::worker::JobEngine;

/// gRPC service for client-facing API
pub struct ClientService {
    scheduler: Arc<LeaderScheduler>,
    engine: JobEngine,
    /// Bounds in-flight dispatches; cancelled on node shutdown.
    cancel: CancellationToken,
}

impl ClientService {
    pub fn new(
        scheduler: Arc<LeaderScheduler>,
        engine: JobEngine,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scheduler,
            engine,
            cancel,
        }
    }
}

#[tonic::async_trait]
impl SchedulerService for ClientService {
    async fn trigger_job(
        &self,
        request: Request<TriggerJobRequest>,
    ) -> Result<Response<TriggerJobResponse>, Status> {
        let job_name = request.into_inner().job_name;
        if job_name.trim().is_empty() {
            return Err(Status::invalid_argument("Job name is required"));
        }

        let assignment = self.scheduler.trigger(&self.cancel, &job_name).await?;

        Ok(Response::new(TriggerJobResponse {
            job_id: assignment.job_id,
            worker_id: assignment.worker_id,
            worker_address: assignment.worker_address,
        }))
    }

    async fn list_jobs(
        &self,
        _request: Request<ListJobsRequest>,
    ) -> Result<Response<ListJobsResponse>, Status> {
        let jobs = self
            .engine
            .jobs()
            .await
            .into_iter()
            .map(|(job_id, name)| JobInfo { job_id, name })
            .collect();

        Ok(Response::new(ListJobsResponse {
            jobs,
            dropped_triggers: self.engine.dropped_triggers(),
        }))
    }

    async fn get_cluster_status(
        &self,
        _request: Request<GetClusterStatusRequest>,
    ) -> Result<Response<GetClusterStatusResponse>, Status> {
        let coordinator = self.scheduler.coordinator();
        let leader_id = coordinator.current_leader().await?.unwrap_or_default();
        let nodes = coordinator
            .members()
            .await?
            .into_iter()
            .map(|m| NodeInfo {
                node_id: m.node_id,
                address: m.address,
                status: m.status.to_string(),
            })
            .collect();

        Ok(Response::new(GetClusterStatusResponse {
            node_id: coordinator.node_id().to_string(),
            is_leader: leader_id == coordinator.node_id(),
            leader_id,
            nodes,
        }))
    }
}
