use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ElectionConfig;
use crate::coordination::backend::{CoordinationBackend, LeaseId};
use crate::coordination::membership::{registration_key, NodeRegistration, NodeStatus};
use crate::coordination::remote::RemoteBackend;
use crate::coordination::session::Session;
use crate::coordination::timer::jittered;
use crate::error::Result;

/// A node's handle on the cluster: one session, the election, and the
/// node's registration record.
pub struct Coordinator {
    node_id: String,
    address: String,
    backend: Arc<dyn CoordinationBackend>,
    session: Session,
    config: ElectionConfig,
}

impl Coordinator {
    /// Connect to the first reachable coordination endpoint and open a session.
    ///
    /// # Errors
    ///
    /// Returns `CronError::Connection` when no endpoint answers within the
    /// dial timeout, or the backend error if the lease cannot be granted.
    pub async fn connect(
        node_id: &str,
        address: &str,
        endpoints: &[String],
        config: ElectionConfig,
    ) -> Result<Self> {
        let backend = RemoteBackend::connect(endpoints, config.dial_timeout()).await?;
        Self::with_backend(node_id, address, Arc::new(backend), config).await
    }

    /// Open a session against an already constructed backend.
    pub async fn with_backend(
        node_id: &str,
        address: &str,
        backend: Arc<dyn CoordinationBackend>,
        config: ElectionConfig,
    ) -> Result<Self> {
        let session = Session::grant(backend.clone(), config.session_ttl()).await?;
        Ok(Self {
            node_id: node_id.to_string(),
            address: address.to_string(),
            backend,
            session,
            config,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn lease(&self) -> LeaseId {
        self.session.lease()
    }

    /// Fires if the session expires while this coordinator is still open.
    pub fn session_lost(&self) -> CancellationToken {
        self.session.lost()
    }

    /// Block until this node holds the election lock or `cancel` fires.
    ///
    /// Returns false on cancellation, session loss or a backend error; it
    /// does not retry after that. Once this returns true, cancelling the same
    /// token releases the lock.
    pub async fn campaign(&self, cancel: &CancellationToken) -> bool {
        let key = self.config.election_key.as_str();
        let lease = self.session.lease();
        let lost = self.session.lost();

        tracing::info!(node_id = %self.node_id, "Start campaigning for leader");

        loop {
            let acquire = self.backend.acquire_leadership(key, &self.node_id, lease);
            tokio::pin!(acquire);

            let attempt = tokio::select! {
                _ = cancel.cancelled() => {
                    // The release must reach the backend after this attempt settles.
                    let _ = acquire.await;
                    self.abandon_campaign().await;
                    return false;
                }
                _ = lost.cancelled() => {
                    tracing::warn!(node_id = %self.node_id, "Session lost, campaign abandoned");
                    return false;
                }
                result = &mut acquire => result,
            };

            match attempt {
                Ok(true) if cancel.is_cancelled() => {
                    self.abandon_campaign().await;
                    return false;
                }
                Ok(true) => {
                    self.watch_leadership(cancel.clone());
                    tracing::info!(node_id = %self.node_id, lease_id = %lease, "Node is now the leader");
                    return true;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(node_id = %self.node_id, error = %e, "Campaign failed");
                    return false;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(node_id = %self.node_id, "Campaign cancelled");
                    return false;
                }
                _ = lost.cancelled() => {
                    tracing::warn!(node_id = %self.node_id, "Session lost, campaign abandoned");
                    return false;
                }
                _ = tokio::time::sleep(jittered(self.config.campaign_retry())) => {}
            }
        }
    }

    /// Release the lock if an acquisition raced with cancellation.
    async fn abandon_campaign(&self) {
        tracing::info!(node_id = %self.node_id, "Campaign cancelled");
        if let Err(e) = self
            .backend
            .release_leadership(&self.config.election_key, self.session.lease())
            .await
        {
            tracing::warn!(node_id = %self.node_id, error = %e, "Failed to release abandoned campaign");
        }
    }

    /// Release the lock when the campaign token fires; stop watching when the
    /// session ends first.
    fn watch_leadership(&self, cancel: CancellationToken) {
        let backend = self.backend.clone();
        let key = self.config.election_key.clone();
        let lease = self.session.lease();
        let node_id = self.node_id.clone();
        let lost = self.session.lost();
        let closed = self.session.closed();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    match backend.release_leadership(&key, lease).await {
                        Ok(()) => tracing::info!(node_id = %node_id, "Leadership relinquished"),
                        Err(e) => tracing::warn!(node_id = %node_id, error = %e, "Failed to relinquish leadership"),
                    }
                }
                _ = lost.cancelled() => {
                    tracing::warn!(node_id = %node_id, "Leadership lost with session");
                }
                _ = closed.cancelled() => {}
            }
        });
    }

    /// Give up the lock now, whether or not the campaign token fired.
    pub async fn resign(&self) -> Result<()> {
        self.backend
            .release_leadership(&self.config.election_key, self.session.lease())
            .await?;
        tracing::info!(node_id = %self.node_id, "Resigned leadership");
        Ok(())
    }

    pub async fn current_leader(&self) -> Result<Option<String>> {
        self.backend.current_leader(&self.config.election_key).await
    }

    pub async fn is_leader(&self) -> Result<bool> {
        Ok(self.current_leader().await?.as_deref() == Some(self.node_id.as_str()))
    }

    /// Write this node's liveness record under the session lease.
    /// Calling it again overwrites the record.
    pub async fn register_node(&self) -> Result<()> {
        let key = registration_key(&self.config.registry_prefix, &self.node_id);
        let record = NodeRegistration::online(&self.node_id, &self.address, self.session.lease());
        self.backend
            .register_self(&key, &record.encode()?, self.session.lease())
            .await?;
        tracing::info!(node_id = %self.node_id, address = %self.address, "Registered node");
        Ok(())
    }

    /// Live, online registrations. Malformed records are skipped.
    pub async fn members(&self) -> Result<Vec<NodeRegistration>> {
        let entries = self
            .backend
            .list_registrations(&self.config.registry_prefix)
            .await?;

        Ok(entries
            .into_iter()
            .filter_map(|(key, value)| match NodeRegistration::decode(&key, &value) {
                Ok(reg) if reg.status == NodeStatus::Online => Some(reg),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed registration");
                    None
                }
            })
            .collect())
    }

    /// Revoke the session, which drops the lock (if held) and the
    /// registration together.
    pub async fn close(&self) {
        if let Err(e) = self.session.close().await {
            tracing::warn!(node_id = %self.node_id, error = %e, "Failed to revoke session");
        }
    }
}
