use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tonic::transport::{Channel, Endpoint};

use crate::coordination::remote::to_uri;
use crate::error::{CronError, Result};
use crate::proto::executor_client::ExecutorClient;

#[derive(Debug)]
struct PooledClient {
    client: ExecutorClient<Channel>,
    last_used: Instant,
}

/// Worker connections keyed by address.
///
/// A checkout reuses the cached channel unless it has sat idle past
/// `max_idle`, in which case it is replaced. Callers evict an address after a
/// transport failure so the next checkout dials again.
#[derive(Debug)]
pub struct ChannelPool {
    clients: Mutex<HashMap<String, PooledClient>>,
    connect_timeout: Duration,
    max_idle: Duration,
}

impl ChannelPool {
    pub fn new(connect_timeout: Duration, max_idle: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            connect_timeout,
            max_idle,
        }
    }

    /// Get or open a client for `addr`.
    ///
    /// The pool lock is not held while dialing, so a worker that never
    /// completes its handshake only delays checkouts for its own address.
    pub async fn checkout(&self, addr: &str) -> Result<ExecutorClient<Channel>> {
        {
            let mut clients = self.clients.lock().await;
            if let Some(pooled) = clients.get_mut(addr) {
                if pooled.last_used.elapsed() < self.max_idle {
                    pooled.last_used = Instant::now();
                    return Ok(pooled.client.clone());
                }
                tracing::debug!(worker = addr, "Pooled channel idle too long, reconnecting");
                clients.remove(addr);
            }
        }

        let client = self.open(addr).await?;

        let mut clients = self.clients.lock().await;
        // A concurrent checkout may have connected first; keep its channel.
        let pooled = clients
            .entry(addr.to_string())
            .or_insert_with(|| PooledClient {
                client,
                last_used: Instant::now(),
            });
        pooled.last_used = Instant::now();
        Ok(pooled.client.clone())
    }

    async fn open(&self, addr: &str) -> Result<ExecutorClient<Channel>> {
        let endpoint = Endpoint::from_shared(to_uri(addr))
            .map_err(|e| CronError::Connection(format!("invalid worker address {}: {}", addr, e)))?
            .connect_timeout(self.connect_timeout);

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| CronError::Connection(format!("failed to connect to {}: {}", addr, e)))?;

        tracing::debug!(worker = addr, "Opened worker channel");
        Ok(ExecutorClient::new(channel))
    }

    /// Forget the channel for `addr`. Returns true if one was cached.
    pub async fn evict(&self, addr: &str) -> bool {
        let removed = self.clients.lock().await.remove(addr).is_some();
        if removed {
            tracing::debug!(worker = addr, "Evicted worker channel");
        }
        removed
    }

    /// Close channels idle longer than `max_idle`. Returns how many were closed.
    pub async fn prune_idle(&self) -> usize {
        let mut clients = self.clients.lock().await;
        let before = clients.len();
        clients.retain(|_, pooled| pooled.last_used.elapsed() < self.max_idle);
        before - clients.len()
    }

    pub async fn close_all(&self) {
        self.clients.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}
