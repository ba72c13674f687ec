use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::coordination::backend::{CoordinationBackend, LeaseId};
use crate::error::{CronError, Result};

#[derive(Debug)]
struct Lease {
    ttl: Duration,
    deadline: Instant,
}

#[derive(Debug)]
struct Entry {
    value: String,
    lease: LeaseId,
}

#[derive(Debug)]
struct Holder {
    candidate: String,
    lease: LeaseId,
}

#[derive(Debug, Default)]
struct State {
    next_lease: i64,
    leases: HashMap<LeaseId, Lease>,
    kv: BTreeMap<String, Entry>,
    locks: HashMap<String, Holder>,
}

impl State {
    /// Drop every lease whose deadline has passed.
    fn reap(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            tracing::info!(lease_id = %id, "Lease expired");
            self.drop_lease(id);
        }
    }

    fn drop_lease(&mut self, id: LeaseId) {
        self.leases.remove(&id);
        self.kv.retain(|_, entry| entry.lease != id);
        self.locks.retain(|_, holder| holder.lease != id);
    }

    fn ensure_live(&self, id: LeaseId) -> Result<()> {
        if self.leases.contains_key(&id) {
            Ok(())
        } else {
            Err(CronError::LeaseExpired(id.0))
        }
    }
}

/// In-process coordination store.
///
/// Expiry is evaluated lazily: every operation first reaps leases whose
/// deadline has passed, so an expired lease is never observable.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn live_state(&self) -> tokio::sync::MutexGuard<'_, State> {
        let mut state = self.state.lock().await;
        state.reap(Instant::now());
        state
    }

    /// Number of live leases.
    pub async fn lease_count(&self) -> usize {
        self.live_state().await.leases.len()
    }
}

#[async_trait]
impl CoordinationBackend for MemoryBackend {
    async fn grant_session(&self, ttl: Duration) -> Result<LeaseId> {
        let mut state = self.live_state().await;
        state.next_lease += 1;
        let id = LeaseId(state.next_lease);
        state.leases.insert(
            id,
            Lease {
                ttl,
                deadline: Instant::now() + ttl,
            },
        );
        tracing::debug!(lease_id = %id, ttl_ms = ttl.as_millis() as u64, "Lease granted");
        Ok(id)
    }

    async fn renew_session(&self, lease: LeaseId) -> Result<()> {
        let mut state = self.live_state().await;
        let entry = state
            .leases
            .get_mut(&lease)
            .ok_or(CronError::LeaseExpired(lease.0))?;
        entry.deadline = Instant::now() + entry.ttl;
        Ok(())
    }

    async fn revoke_session(&self, lease: LeaseId) -> Result<()> {
        let mut state = self.live_state().await;
        if state.leases.contains_key(&lease) {
            state.drop_lease(lease);
            tracing::debug!(lease_id = %lease, "Lease revoked");
        }
        Ok(())
    }

    async fn register_self(&self, key: &str, value: &str, lease: LeaseId) -> Result<()> {
        let mut state = self.live_state().await;
        state.ensure_live(lease)?;
        state.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease,
            },
        );
        Ok(())
    }

    async fn list_registrations(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let state = self.live_state().await;
        Ok(state
            .kv
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect())
    }

    async fn acquire_leadership(
        &self,
        election: &str,
        candidate: &str,
        lease: LeaseId,
    ) -> Result<bool> {
        let mut state = self.live_state().await;
        state.ensure_live(lease)?;
        match state.locks.get(election) {
            Some(holder) => Ok(holder.lease == lease),
            None => {
                state.locks.insert(
                    election.to_string(),
                    Holder {
                        candidate: candidate.to_string(),
                        lease,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release_leadership(&self, election: &str, lease: LeaseId) -> Result<()> {
        let mut state = self.live_state().await;
        if state
            .locks
            .get(election)
            .is_some_and(|holder| holder.lease == lease)
        {
            state.locks.remove(election);
        }
        Ok(())
    }

    async fn current_leader(&self, election: &str) -> Result<Option<String>> {
        let state = self.live_state().await;
        Ok(state.locks.get(election).map(|h| h.candidate.clone()))
    }
}
