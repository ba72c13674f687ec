use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Request};

use crate::config::DispatchConfig;
use crate::dispatch::pool::ChannelPool;
use crate::error::{CronError, Result};
use crate::proto::PushJobRequest;

/// Response code a worker returns when the job reached its queue.
pub const ACCEPTED: i32 = 200;

/// Time-derived correlation ids, strictly increasing per generator.
#[derive(Debug, Default)]
pub struct LogIdGenerator {
    last: AtomicI64,
}

impl LogIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time in nanoseconds, bumped past the previous id if the clock
    /// has not moved or went backwards.
    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Leader-side client for `PushJob`.
#[derive(Debug)]
pub struct Dispatcher {
    pool: ChannelPool,
    call_timeout: Duration,
    log_ids: LogIdGenerator,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(&DispatchConfig::default())
    }
}

impl Dispatcher {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            pool: ChannelPool::new(config.connect_timeout(), config.max_idle()),
            call_timeout: config.call_timeout(),
            log_ids: LogIdGenerator::new(),
        }
    }

    pub fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    /// Push one job to the worker at `worker_addr`.
    ///
    /// The call is bounded by the dispatcher's own timeout and by `cancel`,
    /// whichever comes first. Success means the worker accepted the job into
    /// its queue, not that it ran.
    ///
    /// # Errors
    ///
    /// - `Connection` if the worker cannot be reached
    /// - `DispatchTimeout` if connecting and answering take longer than the
    ///   call timeout
    /// - `DispatchRejected` if the worker answers with a non-200 code
    /// - `Cancelled` if `cancel` fires first
    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        worker_addr: &str,
        job_id: &str,
        job_name: &str,
    ) -> Result<()> {
        let log_id = self.log_ids.next_id();
        let mut request = Request::new(PushJobRequest {
            job_id: job_id.to_string(),
            job_name: job_name.to_string(),
            log_id,
        });
        request.set_timeout(self.call_timeout);

        tracing::debug!(worker = worker_addr, job_id, job_name, log_id, "Dispatching job");

        // Dialing counts against the call timeout.
        let push = async {
            let mut client = self.pool.checkout(worker_addr).await?;
            Ok::<_, CronError>(client.push_job(request).await)
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CronError::Cancelled),
            outcome = tokio::time::timeout(self.call_timeout, push) => outcome,
        };

        let response = match outcome {
            Err(_) => {
                self.pool.evict(worker_addr).await;
                return Err(CronError::DispatchTimeout {
                    worker: worker_addr.to_string(),
                    timeout_ms: self.call_timeout.as_millis() as u64,
                });
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(Err(status))) => {
                if matches!(status.code(), Code::Unavailable | Code::Unknown) {
                    self.pool.evict(worker_addr).await;
                }
                return Err(match status.code() {
                    Code::Unavailable => CronError::Connection(format!(
                        "worker {} unavailable: {}",
                        worker_addr,
                        status.message()
                    )),
                    // The worker's server enforces the grpc-timeout header as CANCELLED.
                    Code::DeadlineExceeded | Code::Cancelled => CronError::DispatchTimeout {
                        worker: worker_addr.to_string(),
                        timeout_ms: self.call_timeout.as_millis() as u64,
                    },
                    _ => CronError::Grpc(status),
                });
            }
            Ok(Ok(Ok(response))) => response.into_inner(),
        };

        if response.code != ACCEPTED {
            tracing::warn!(
                worker = worker_addr,
                job_id,
                log_id,
                code = response.code,
                message = %response.message,
                "Worker rejected job"
            );
            return Err(CronError::DispatchRejected {
                worker: worker_addr.to_string(),
                code: response.code,
                message: response.message,
            });
        }

        tracing::info!(worker = worker_addr, job_id, job_name, log_id, "Job dispatched");
        Ok(())
    }

    /// Drop every pooled worker connection.
    pub async fn close(&self) {
        self.pool.close_all().await;
    }
}
