use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::coordination::MemoryBackend;
use crate::grpc::client_service::ClientService;
use crate::grpc::coordination_service::CoordinationService;
use crate::grpc::worker_service::WorkerService;
use crate::proto::coordination_server::CoordinationServer;
use crate::proto::executor_server::ExecutorServer;
use crate::proto::scheduler_service_server::SchedulerServiceServer;
use crate::scheduler::LeaderScheduler;
use crate::worker::JobEngine;

/// Node gRPC server: the `PushJob` adapter, plus the client API when a
/// scheduler is attached.
pub struct GrpcServer {
    engine: JobEngine,
    scheduler: Option<Arc<LeaderScheduler>>,
}

impl GrpcServer {
    pub fn new(engine: JobEngine) -> Self {
        Self {
            engine,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<LeaderScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Serve on an already bound listener until `cancel` fires.
    pub async fn serve(
        self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), tonic::transport::Error> {
        let local_addr = listener.local_addr().ok();
        tracing::info!(addr = ?local_addr, "Starting gRPC server");

        let client_service = self.scheduler.map(|scheduler| {
            SchedulerServiceServer::new(ClientService::new(
                scheduler,
                self.engine.clone(),
                cancel.clone(),
            ))
        });

        Server::builder()
            .add_service(ExecutorServer::new(WorkerService::new(self.engine)))
            .add_optional_service(client_service)
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), cancel.cancelled())
            .await?;

        tracing::info!(addr = ?local_addr, "gRPC server stopped");
        Ok(())
    }
}

/// Serve the coordination backend on `listener` until `cancel` fires.
pub async fn serve_coordination(
    backend: Arc<MemoryBackend>,
    listener: TcpListener,
    cancel: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    tracing::info!(addr = ?listener.local_addr().ok(), "Starting coordination server");

    Server::builder()
        .add_service(CoordinationServer::new(CoordinationService::new(backend)))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), cancel.cancelled())
        .await
}
