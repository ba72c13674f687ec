use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};

use crate::coordination::backend::{CoordinationBackend, LeaseId};
use crate::error::{CronError, Result};
use crate::proto::coordination_client::CoordinationClient;
use crate::proto::{
    GrantLeaseRequest, KeepAliveRequest, LeaderRequest, PutRequest, RangeRequest,
    ReleaseRequest, RevokeLeaseRequest, TryAcquireRequest,
};

/// Per-request deadline for coordination calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Prefix `http://` unless the address already carries a scheme.
pub(crate) fn to_uri(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

/// Coordination backend reached over the `Coordination` gRPC service.
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    client: CoordinationClient<Channel>,
    endpoint: String,
}

impl RemoteBackend {
    /// Dial each endpoint in order and keep the first that answers.
    ///
    /// # Errors
    ///
    /// Returns `CronError::Connection` if none of the endpoints is reachable
    /// within `dial_timeout`.
    pub async fn connect(endpoints: &[String], dial_timeout: Duration) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(CronError::Connection(
                "no coordination endpoints configured".to_string(),
            ));
        }

        let mut failures = Vec::new();
        for addr in endpoints {
            let uri = to_uri(addr);
            let endpoint = match Endpoint::from_shared(uri.clone()) {
                Ok(endpoint) => endpoint
                    .connect_timeout(dial_timeout)
                    .timeout(REQUEST_TIMEOUT),
                Err(e) => {
                    failures.push(format!("{}: {}", addr, e));
                    continue;
                }
            };

            match endpoint.connect().await {
                Ok(channel) => {
                    tracing::info!(endpoint = %uri, "Connected to coordination backend");
                    return Ok(Self {
                        client: CoordinationClient::new(channel),
                        endpoint: uri,
                    });
                }
                Err(e) => {
                    tracing::warn!(endpoint = %uri, error = %e, "Coordination endpoint unreachable");
                    failures.push(format!("{}: {}", addr, e));
                }
            }
        }

        Err(CronError::Connection(failures.join("; ")))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Map a status from a lease-bound call. NOT_FOUND means the lease is gone.
fn lease_error(status: Status, lease: LeaseId) -> CronError {
    match status.code() {
        Code::NotFound => CronError::LeaseExpired(lease.0),
        Code::Unavailable => CronError::Connection(status.message().to_string()),
        _ => CronError::Grpc(status),
    }
}

fn call_error(status: Status) -> CronError {
    match status.code() {
        Code::Unavailable => CronError::Connection(status.message().to_string()),
        _ => CronError::Grpc(status),
    }
}

#[async_trait]
impl CoordinationBackend for RemoteBackend {
    async fn grant_session(&self, ttl: Duration) -> Result<LeaseId> {
        let response = self
            .client
            .clone()
            .grant_lease(GrantLeaseRequest {
                ttl_ms: ttl.as_millis() as u64,
            })
            .await
            .map_err(call_error)?
            .into_inner();
        Ok(LeaseId(response.lease_id))
    }

    async fn renew_session(&self, lease: LeaseId) -> Result<()> {
        self.client
            .clone()
            .keep_alive(KeepAliveRequest { lease_id: lease.0 })
            .await
            .map_err(|s| lease_error(s, lease))?;
        Ok(())
    }

    async fn revoke_session(&self, lease: LeaseId) -> Result<()> {
        self.client
            .clone()
            .revoke_lease(RevokeLeaseRequest { lease_id: lease.0 })
            .await
            .map_err(call_error)?;
        Ok(())
    }

    async fn register_self(&self, key: &str, value: &str, lease: LeaseId) -> Result<()> {
        self.client
            .clone()
            .put(PutRequest {
                key: key.to_string(),
                value: value.to_string(),
                lease_id: lease.0,
            })
            .await
            .map_err(|s| lease_error(s, lease))?;
        Ok(())
    }

    async fn list_registrations(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let response = self
            .client
            .clone()
            .range(RangeRequest {
                prefix: prefix.to_string(),
            })
            .await
            .map_err(call_error)?
            .into_inner();
        Ok(response
            .kvs
            .into_iter()
            .map(|kv| (kv.key, kv.value))
            .collect())
    }

    async fn acquire_leadership(
        &self,
        election: &str,
        candidate: &str,
        lease: LeaseId,
    ) -> Result<bool> {
        let response = self
            .client
            .clone()
            .try_acquire(TryAcquireRequest {
                key: election.to_string(),
                candidate: candidate.to_string(),
                lease_id: lease.0,
            })
            .await
            .map_err(|s| lease_error(s, lease))?
            .into_inner();
        Ok(response.acquired)
    }

    async fn release_leadership(&self, election: &str, lease: LeaseId) -> Result<()> {
        self.client
            .clone()
            .release(ReleaseRequest {
                key: election.to_string(),
                lease_id: lease.0,
            })
            .await
            .map_err(call_error)?;
        Ok(())
    }

    async fn current_leader(&self, election: &str) -> Result<Option<String>> {
        let response = self
            .client
            .clone()
            .leader(LeaderRequest {
                key: election.to_string(),
            })
            .await
            .map_err(call_error)?
            .into_inner();
        Ok(response.found.then_some(response.holder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_uri_adds_scheme_once() {
        assert_eq!(to_uri("127.0.0.1:2379"), "http://127.0.0.1:2379");
        assert_eq!(to_uri("http://host:1"), "http://host:1");
        assert_eq!(to_uri("https://host:1"), "https://host:1");
    }

    #[tokio::test]
    async fn connect_with_no_endpoints_fails() {
        let err = RemoteBackend::connect(&[], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CronError::Connection(_)));
    }
}
