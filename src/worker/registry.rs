use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::worker::job::Job;

/// Job definitions keyed by id.
///
/// Registration takes the write lock; execution lookups take the read lock
/// only long enough to clone the `Arc<Job>` out.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job, replacing any job registered under the same id.
    /// Returns true if an earlier definition was replaced.
    pub async fn insert(&self, job: Job) -> bool {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id.clone(), Arc::new(job)).is_some()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Job>> {
        self.jobs.read().await.get(id).cloned()
    }

    /// (id, name) pairs sorted by id.
    pub async fn list(&self) -> Vec<(String, String)> {
        let jobs = self.jobs.read().await;
        let mut entries: Vec<(String, String)> = jobs
            .values()
            .map(|job| (job.id.clone(), job.name.clone()))
            .collect();
        entries.sort();
        entries
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
