use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::coordination::Coordinator;
use crate::dispatch::Dispatcher;
use crate::error::{CronError, Result};
use crate::scheduler::assigner::WorkerAssigner;
use crate::worker::job_id_for;

/// Where a triggered job was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub job_id: String,
    pub job_name: String,
    pub worker_id: String,
    pub worker_address: String,
}

/// Leader-only scheduling: turns a trigger into a `PushJob` to one worker
/// taken from membership.
pub struct LeaderScheduler {
    coordinator: Arc<Coordinator>,
    dispatcher: Dispatcher,
    assigner: Mutex<WorkerAssigner>,
    leading: AtomicBool,
}

impl LeaderScheduler {
    pub fn new(coordinator: Arc<Coordinator>, dispatcher: Dispatcher) -> Self {
        Self {
            coordinator,
            dispatcher,
            assigner: Mutex::new(WorkerAssigner::new()),
            leading: AtomicBool::new(false),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Flipped by the node's election loop.
    pub fn set_leading(&self, leading: bool) {
        self.leading.store(leading, Ordering::SeqCst);
    }

    pub fn is_leading(&self) -> bool {
        self.leading.load(Ordering::SeqCst)
    }

    /// Dispatch one execution of `job_name` to the next worker.
    ///
    /// # Errors
    ///
    /// - `NotLeader` (with the current holder, if known) on a follower
    /// - `NoWorkersAvailable` when membership is empty
    /// - any dispatch error; nothing is retried
    pub async fn trigger(&self, cancel: &CancellationToken, job_name: &str) -> Result<Assignment> {
        if !self.is_leading() {
            let leader = self.coordinator.current_leader().await.unwrap_or_default();
            return Err(CronError::NotLeader(leader));
        }

        let members = self.coordinator.members().await?;
        let worker = self
            .assigner
            .lock()
            .await
            .next_worker(&members)
            .ok_or(CronError::NoWorkersAvailable)?;

        let job_id = job_id_for(job_name);
        self.dispatcher
            .dispatch(cancel, &worker.address, &job_id, job_name)
            .await?;

        tracing::info!(job_id = %job_id, worker_id = %worker.node_id, "Job assigned");

        Ok(Assignment {
            job_id,
            job_name: job_name.to_string(),
            worker_id: worker.node_id,
            worker_address: worker.address,
        })
    }

    /// Close worker connections that have sat idle too long.
    pub async fn prune_connections(&self) -> usize {
        self.dispatcher.pool().prune_idle().await
    }

    /// Close pooled worker connections.
    pub async fn shutdown(&self) {
        self.dispatcher.close().await;
    }
}
