use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::coordination::backend::{CoordinationBackend, LeaseId};
use crate::error::{CronError, Result};

/// A lease kept alive by a background heartbeat.
///
/// `close` stops the heartbeat and revokes the lease. Dropping the session
/// without closing it only stops the heartbeat, and the backend expires the
/// lease one TTL later, the same as if the process had crashed.
pub struct Session {
    backend: Arc<dyn CoordinationBackend>,
    lease: LeaseId,
    stop: CancellationToken,
    lost: CancellationToken,
    keepalive: JoinHandle<()>,
}

impl Session {
    /// Grant a lease with `ttl` and start renewing it every `ttl / 3`.
    pub async fn grant(backend: Arc<dyn CoordinationBackend>, ttl: Duration) -> Result<Self> {
        let lease = backend.grant_session(ttl).await?;
        let stop = CancellationToken::new();
        let lost = CancellationToken::new();

        let keepalive = tokio::spawn(keep_alive(
            backend.clone(),
            lease,
            ttl,
            stop.clone(),
            lost.clone(),
        ));

        tracing::info!(lease_id = %lease, ttl_ms = ttl.as_millis() as u64, "Session started");

        Ok(Self {
            backend,
            lease,
            stop,
            lost,
            keepalive,
        })
    }

    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    /// Fires when the backend no longer honours the lease while the session
    /// is still supposed to be open.
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Fires once `close` has been called or the session was dropped.
    pub fn closed(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Stop renewing and revoke the lease. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        if self.stop.is_cancelled() {
            return Ok(());
        }
        self.stop.cancel();
        self.keepalive.abort();

        if self.is_lost() {
            return Ok(());
        }
        self.backend.revoke_session(self.lease).await?;
        tracing::info!(lease_id = %self.lease, "Session closed");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop.cancel();
        self.keepalive.abort();
    }
}

async fn keep_alive(
    backend: Arc<dyn CoordinationBackend>,
    lease: LeaseId,
    ttl: Duration,
    stop: CancellationToken,
    lost: CancellationToken,
) {
    let period = (ttl / 3).max(Duration::from_millis(10));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_renewed = Instant::now();

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = interval.tick() => {}
        }

        match backend.renew_session(lease).await {
            Ok(()) => {
                last_renewed = Instant::now();
                tracing::trace!(lease_id = %lease, "Lease renewed");
            }
            Err(CronError::LeaseExpired(_)) => {
                tracing::error!(lease_id = %lease, "Lease expired, session lost");
                lost.cancel();
                return;
            }
            Err(e) => {
                let since = last_renewed.elapsed();
                tracing::warn!(
                    lease_id = %lease,
                    error = %e,
                    since_last_renewal_ms = since.as_millis() as u64,
                    "Lease renewal failed"
                );
                if since >= ttl {
                    tracing::error!(lease_id = %lease, "No renewal within TTL, session lost");
                    lost.cancel();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::memory::MemoryBackend;

    #[tokio::test]
    async fn heartbeat_keeps_lease_alive() {
        let backend = Arc::new(MemoryBackend::new());
        let session = Session::grant(backend.clone(), Duration::from_millis(150))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(backend.lease_count().await, 1);
        assert!(!session.is_lost());
        session.close().await.unwrap();
        assert_eq!(backend.lease_count().await, 0);
    }

    #[tokio::test]
    async fn revoked_lease_marks_session_lost() {
        let backend = Arc::new(MemoryBackend::new());
        let session = Session::grant(backend.clone(), Duration::from_millis(150))
            .await
            .unwrap();

        backend.revoke_session(session.lease()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), session.lost().cancelled())
            .await
            .expect("session should notice the revoked lease");
        assert!(session.is_lost());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let session = Session::grant(backend, Duration::from_millis(300))
            .await
            .unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(session.closed().is_cancelled());
    }
}
