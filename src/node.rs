use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::coordination::{CoordinationBackend, Coordinator};
use crate::dispatch::Dispatcher;
use crate::error::{CronError, Result};
use crate::grpc::GrpcServer;
use crate::scheduler::LeaderScheduler;
use crate::worker::command::shell_job;
use crate::worker::JobEngine;

const POOL_PRUNE_INTERVAL: Duration = Duration::from_secs(30);

/// Main node that orchestrates all components
pub struct Node {
    pub config: NodeConfig,
    pub engine: JobEngine,
    pub coordinator: Arc<Coordinator>,
    pub scheduler: Arc<LeaderScheduler>,
}

impl Node {
    /// Connect to the configured coordination endpoints and build the node.
    ///
    /// # Errors
    ///
    /// Returns `CronError::Connection` if no coordination endpoint is reachable.
    pub async fn connect(config: NodeConfig) -> Result<Self> {
        let coordinator = Coordinator::connect(
            &config.node_id,
            &config.advertise_addr,
            &config.coordinator_endpoints,
            config.election.clone(),
        )
        .await?;
        Ok(Self::build(config, coordinator).await)
    }

    /// Build the node over an existing backend (used by tests).
    pub async fn with_backend(
        config: NodeConfig,
        backend: Arc<dyn CoordinationBackend>,
    ) -> Result<Self> {
        let coordinator = Coordinator::with_backend(
            &config.node_id,
            &config.advertise_addr,
            backend,
            config.election.clone(),
        )
        .await?;
        Ok(Self::build(config, coordinator).await)
    }

    async fn build(config: NodeConfig, coordinator: Coordinator) -> Self {
        let engine = JobEngine::new(&config.engine);
        for job in &config.jobs {
            engine
                .add_job(&job.name, shell_job(job.command.clone()))
                .await;
        }

        let coordinator = Arc::new(coordinator);
        let scheduler = Arc::new(LeaderScheduler::new(
            coordinator.clone(),
            Dispatcher::new(&config.dispatch),
        ));

        Self {
            config,
            engine,
            coordinator,
            scheduler,
        }
    }

    /// Bind the configured listen address and run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| {
                CronError::Connection(format!(
                    "failed to bind {}: {}",
                    self.config.listen_addr, e
                ))
            })?;
        self.serve(listener, cancel).await
    }

    /// Run every node subsystem on an already bound listener.
    ///
    /// 1. Starts the local job engine
    /// 2. Starts the gRPC server (`PushJob` adapter and client API)
    /// 3. Registers this node in membership
    /// 4. Campaigns for leadership and leads until cancelled
    ///
    /// On exit the session is always closed, which drops the lock and the
    /// registration. The caller's token is observed but never cancelled here.
    ///
    /// # Errors
    ///
    /// Returns the registration error, or `LeaseExpired` if the session is
    /// lost while the node is running.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let cancel = cancel.child_token();
        tracing::info!(
            node_id = %self.config.node_id,
            advertise_addr = %self.config.advertise_addr,
            jobs = self.config.jobs.len(),
            "Starting cron-lite node"
        );

        let engine = self.engine.clone();
        let engine_cancel = cancel.child_token();
        let engine_handle = tokio::spawn(async move {
            engine.start(engine_cancel).await;
        });

        let server = GrpcServer::new(self.engine.clone()).with_scheduler(self.scheduler.clone());
        let grpc_cancel = cancel.child_token();
        let grpc_handle = tokio::spawn(async move {
            if let Err(e) = server.serve(listener, grpc_cancel).await {
                tracing::error!(error = %e, "gRPC server error");
            }
        });

        let result = match self.coordinator.register_node().await {
            Ok(()) => self.election_loop(&cancel).await,
            Err(e) => {
                tracing::error!(error = %e, "Node registration failed");
                Err(e)
            }
        };

        // Session loss or registration failure stops the whole node.
        cancel.cancel();
        self.scheduler.set_leading(false);
        self.scheduler.shutdown().await;
        self.coordinator.close().await;

        let _ = engine_handle.await;
        let _ = grpc_handle.await;

        tracing::info!(node_id = %self.config.node_id, "Node stopped");
        result
    }

    /// Campaign, lead until cancelled, and step down if the session is lost.
    async fn election_loop(&self, cancel: &CancellationToken) -> Result<()> {
        let lost = self.coordinator.session_lost();

        loop {
            if !self.coordinator.campaign(cancel).await {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                if lost.is_cancelled() {
                    return Err(CronError::LeaseExpired(self.coordinator.lease().0));
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(self.config.election.campaign_retry()) => continue,
                }
            }

            self.scheduler.set_leading(true);
            let mut prune = tokio::time::interval(POOL_PRUNE_INTERVAL);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        self.scheduler.set_leading(false);
                        return Ok(());
                    }
                    _ = lost.cancelled() => {
                        self.scheduler.set_leading(false);
                        tracing::error!(
                            node_id = %self.config.node_id,
                            "Session lost while leading, stepping down"
                        );
                        return Err(CronError::LeaseExpired(self.coordinator.lease().0));
                    }
                    _ = prune.tick() => {
                        let closed = self.scheduler.prune_connections().await;
                        if closed > 0 {
                            tracing::debug!(closed, "Pruned idle worker connections");
                        }
                    }
                }
            }
        }
    }
}
