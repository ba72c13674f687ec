use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

const JOB_ID_PREFIX: &str = "job-";

/// Boxed future returned by a job's logic.
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Type-erased job logic. Invoked once per execution.
pub type JobLogic = Arc<dyn Fn(JobContext) -> JobFuture + Send + Sync>;

/// Deterministic id for a job name.
pub fn job_id_for(name: &str) -> String {
    format!("{}{}", JOB_ID_PREFIX, name)
}

/// Context handed to a job for one invocation.
///
/// The token is a child of the engine's token: cancelling the engine
/// cancels every running invocation, but jobs must observe it themselves.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub job_name: String,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(job_id: String, job_name: String, cancel: CancellationToken) -> Self {
        Self {
            job_id,
            job_name,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the invocation has been asked to stop.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

pub struct Job {
    pub id: String,
    pub name: String,
    pub logic: JobLogic,
}

impl Job {
    pub fn new<F, Fut>(name: &str, logic: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let logic: JobLogic = Arc::new(move |ctx: JobContext| Box::pin(logic(ctx)) as JobFuture);
        Self {
            id: job_id_for(name),
            name: name.to_string(),
            logic,
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_is_prefixed_name() {
        assert_eq!(job_id_for("backup"), "job-backup");
        assert_eq!(job_id_for(""), "job-");
    }

    #[test]
    fn job_new_derives_id() {
        let job = Job::new("report", |_ctx| async { Ok(()) });
        assert_eq!(job.id, "job-report");
        assert_eq!(job.name, "report");
    }

    #[tokio::test]
    async fn context_observes_parent_cancellation() {
        let parent = CancellationToken::new();
        let ctx = JobContext::new("job-a".into(), "a".into(), parent.child_token());
        assert!(!ctx.is_cancelled());
        parent.cancel();
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }
}
