use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque lease handle issued by a coordination backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(pub i64);

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Capabilities the coordinator needs from a lease/lock/kv store.
///
/// Every write carries a lease. When the lease expires or is revoked, every
/// key and lock bound to it disappears with it. Each call is a single atomic
/// operation against the backend; nothing is rolled back across calls.
#[async_trait]
pub trait CoordinationBackend: Send + Sync {
    /// Create a lease that expires `ttl` after its last renewal.
    async fn grant_session(&self, ttl: Duration) -> Result<LeaseId>;

    /// Push the lease deadline out by its TTL.
    /// Fails with `CronError::LeaseExpired` once the lease is gone.
    async fn renew_session(&self, lease: LeaseId) -> Result<()>;

    /// Drop the lease and everything bound to it. Unknown leases are ignored.
    async fn revoke_session(&self, lease: LeaseId) -> Result<()>;

    /// Put `value` at `key`, bound to `lease`. Overwrites.
    async fn register_self(&self, key: &str, value: &str, lease: LeaseId) -> Result<()>;

    /// All live (key, value) pairs under `prefix`, sorted by key.
    async fn list_registrations(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// Try once to take the lock at `election`. Returns true if `lease` now
    /// holds it (including when it already did).
    async fn acquire_leadership(
        &self,
        election: &str,
        candidate: &str,
        lease: LeaseId,
    ) -> Result<bool>;

    /// Release the lock if `lease` holds it; otherwise a no-op.
    async fn release_leadership(&self, election: &str, lease: LeaseId) -> Result<()>;

    /// Candidate name of the current holder, if any.
    async fn current_leader(&self, election: &str) -> Result<Option<String>>;
}
