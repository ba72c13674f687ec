use std::sync::Arc;
use std::time::Duration;

use tonic::{Request, Response, Status};

use crate::coordination::{CoordinationBackend, LeaseId, MemoryBackend};
use crate::proto::coordination_server::Coordination;
use crate::proto::{
    GrantLeaseRequest, GrantLeaseResponse, KeepAliveRequest, KeepAliveResponse, KeyValue,
    LeaderRequest, LeaderResponse, PutRequest, PutResponse, RangeRequest, RangeResponse,
    ReleaseRequest, ReleaseResponse, RevokeLeaseRequest, RevokeLeaseResponse, TryAcquireRequest,
    TryAcquireResponse,
};

/// Leases shorter than this are rounded up.
const MIN_TTL_MS: u64 = 50;

/// Serves a `MemoryBackend` to remote coordinators.
pub struct CoordinationService {
    backend: Arc<MemoryBackend>,
}

impl CoordinationService {
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self { backend }
    }
}

#[tonic::async_trait]
impl Coordination for CoordinationService {
    async fn grant_lease(
        &self,
        request: Request<GrantLeaseRequest>,
    ) -> Result<Response<GrantLeaseResponse>, Status> {
        let ttl_ms = request.into_inner().ttl_ms.max(MIN_TTL_MS);
        let lease = self
            .backend
            .grant_session(Duration::from_millis(ttl_ms))
            .await?;
        Ok(Response::new(GrantLeaseResponse {
            lease_id: lease.0,
            ttl_ms,
        }))
    }

    async fn keep_alive(
        &self,
        request: Request<KeepAliveRequest>,
    ) -> Result<Response<KeepAliveResponse>, Status> {
        let lease_id = request.into_inner().lease_id;
        self.backend.renew_session(LeaseId(lease_id)).await?;
        Ok(Response::new(KeepAliveResponse { lease_id }))
    }

    async fn revoke_lease(
        &self,
        request: Request<RevokeLeaseRequest>,
    ) -> Result<Response<RevokeLeaseResponse>, Status> {
        let lease_id = request.into_inner().lease_id;
        self.backend.revoke_session(LeaseId(lease_id)).await?;
        Ok(Response::new(RevokeLeaseResponse {}))
    }

    async fn put(&self, request: Request<PutRequest>) -> Result<Response<PutResponse>, Status> {
        let req = request.into_inner();
        self.backend
            .register_self(&req.key, &req.value, LeaseId(req.lease_id))
            .await?;
        Ok(Response::new(PutResponse {}))
    }

    async fn range(
        &self,
        request: Request<RangeRequest>,
    ) -> Result<Response<RangeResponse>, Status> {
        let prefix = request.into_inner().prefix;
        let kvs = self
            .backend
            .list_registrations(&prefix)
            .await?
            .into_iter()
            .map(|(key, value)| KeyValue { key, value })
            .collect();
        Ok(Response::new(RangeResponse { kvs }))
    }

    async fn try_acquire(
        &self,
        request: Request<TryAcquireRequest>,
    ) -> Result<Response<TryAcquireResponse>, Status> {
        let req = request.into_inner();
        let acquired = self
            .backend
            .acquire_leadership(&req.key, &req.candidate, LeaseId(req.lease_id))
            .await?;
        let holder = self
            .backend
            .current_leader(&req.key)
            .await?
            .unwrap_or_default();
        Ok(Response::new(TryAcquireResponse { acquired, holder }))
    }

    async fn release(
        &self,
        request: Request<ReleaseRequest>,
    ) -> Result<Response<ReleaseResponse>, Status> {
        let req = request.into_inner();
        self.backend
            .release_leadership(&req.key, LeaseId(req.lease_id))
            .await?;
        Ok(Response::new(ReleaseResponse {}))
    }

    async fn leader(
        &self,
        request: Request<LeaderRequest>,
    ) -> Result<Response<LeaderResponse>, Status> {
        let key = request.into_inner().key;
        let holder = self.backend.current_leader(&key).await?;
        Ok(Response::new(LeaderResponse {
            found: holder.is_some(),
            holder: holder.unwrap_or_default(),
        }))
    }
}
