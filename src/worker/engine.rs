use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::worker::job::{Job, JobContext};
use crate::worker::queue::{Enqueue, TriggerQueue};
use crate::worker::registry::JobRegistry;

/// Local execution engine: job registry, bounded trigger queue and the
/// consumer loop that runs each dequeued job on its own task.
///
/// Cloning is cheap and every clone shares the same registry and queue, so
/// the gRPC adapter and the consumer loop can hold their own handles.
#[derive(Debug, Clone)]
pub struct JobEngine {
    registry: Arc<JobRegistry>,
    queue: Arc<TriggerQueue>,
}

impl Default for JobEngine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl JobEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new()),
            queue: Arc::new(TriggerQueue::new(config.queue_capacity)),
        }
    }

    /// Register `logic` under `name` and return its deterministic id.
    ///
    /// A second registration with the same name replaces the first.
    pub async fn add_job<F, Fut>(&self, name: &str, logic: F) -> String
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job = Job::new(name, logic);
        let id = job.id.clone();
        if self.registry.insert(job).await {
            tracing::warn!(job_id = %id, job_name = name, "Job definition replaced");
        } else {
            tracing::debug!(job_id = %id, job_name = name, "Job registered");
        }
        id
    }

    /// Queue one execution of `job_id` without waiting.
    ///
    /// When the queue is full the trigger is dropped and only a warning is
    /// logged; the caller gets no signal.
    pub fn trigger_job(&self, job_id: impl Into<String>) {
        let job_id = job_id.into();
        match self.queue.push(job_id.clone()) {
            Enqueue::Queued => tracing::debug!(job_id = %job_id, "Job triggered"),
            Enqueue::Full => tracing::warn!(
                job_id = %job_id,
                capacity = self.queue.capacity(),
                "Job queue full, trigger dropped"
            ),
            Enqueue::Closed => {
                tracing::warn!(job_id = %job_id, "Job queue closed, trigger dropped")
            }
        }
    }

    /// Run the consumer loop until `cancel` fires.
    ///
    /// Each dequeued id is moved into its own task; the loop never waits on
    /// a job. Running jobs receive a child of `cancel`.
    pub async fn start(&self, cancel: CancellationToken) {
        let Some(mut rx) = self.queue.take_receiver().await else {
            tracing::warn!("Job engine already running, ignoring second start");
            return;
        };

        tracing::info!(capacity = self.queue.capacity(), "Job engine started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job engine stopped");
                    break;
                }
                next = rx.recv() => {
                    let Some(job_id) = next else {
                        tracing::info!("Job queue closed, engine stopping");
                        break;
                    };
                    tokio::spawn(execute(
                        self.registry.clone(),
                        job_id,
                        cancel.child_token(),
                    ));
                }
            }
        }

        self.queue.restore_receiver(rx).await;
    }

    /// (id, name) of every registered job.
    pub async fn jobs(&self) -> Vec<(String, String)> {
        self.registry.list().await
    }

    /// Triggers dropped since startup because the queue was full.
    pub fn dropped_triggers(&self) -> u64 {
        self.queue.dropped()
    }

    /// Triggers waiting to be dequeued.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Run one job invocation. This is the fault isolation boundary: the logic
/// runs on its own task and whatever happens to it ends here as a log line.
async fn execute(registry: Arc<JobRegistry>, job_id: String, cancel: CancellationToken) {
    let Some(job) = registry.get(&job_id).await else {
        tracing::warn!(job_id = %job_id, "Job not found, trigger ignored");
        return;
    };

    let ctx = JobContext::new(job.id.clone(), job.name.clone(), cancel);
    let logic = job.logic.clone();
    let started = Instant::now();
    tracing::info!(job_id = %job.id, job_name = %job.name, "Job started");

    // The closure call itself happens inside the task so a panic while
    // building the future is caught too.
    let handle = tokio::spawn(async move { logic(ctx).await });

    match handle.await {
        Ok(Ok(())) => tracing::info!(
            job_id = %job.id,
            job_name = %job.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job finished"
        ),
        Ok(Err(e)) => tracing::warn!(
            job_id = %job.id,
            job_name = %job.name,
            error = %e,
            "Job failed"
        ),
        Err(e) if e.is_panic() => tracing::error!(
            job_id = %job.id,
            job_name = %job.name,
            panic = %panic_message(e.into_panic()),
            "Job panicked"
        ),
        Err(e) => tracing::warn!(
            job_id = %job.id,
            job_name = %job.name,
            error = %e,
            "Job task aborted"
        ),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_handles_common_payloads() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "non-string panic payload");
    }

    #[tokio::test]
    async fn second_start_returns_immediately() {
        let engine = JobEngine::default();
        let cancel = CancellationToken::new();
        let first = tokio::spawn({
            let engine = engine.clone();
            let cancel = cancel.clone();
            async move { engine.start(cancel).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Returns without waiting for cancellation.
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            engine.start(CancellationToken::new()),
        )
        .await
        .expect("second start should not block");

        cancel.cancel();
        first.await.unwrap();
    }
}
