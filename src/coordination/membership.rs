use serde::{Deserialize, Serialize};

use crate::coordination::backend::LeaseId;
use crate::error::{CronError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Online => write!(f, "online"),
        }
    }
}

/// Liveness record a node writes under its session lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_id: String,
    pub address: String,
    pub lease_id: LeaseId,
    pub status: NodeStatus,
}

impl NodeRegistration {
    pub fn online(node_id: &str, address: &str, lease_id: LeaseId) -> Self {
        Self {
            node_id: node_id.to_string(),
            address: address.to_string(),
            lease_id,
            status: NodeStatus::Online,
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CronError::Internal(e.to_string()))
    }

    pub fn decode(key: &str, value: &str) -> Result<Self> {
        serde_json::from_str(value).map_err(|e| CronError::InvalidRegistration {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

pub fn registration_key(prefix: &str, node_id: &str) -> String {
    format!("{}{}", prefix, node_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_status_as_online_marker() {
        let reg = NodeRegistration::online("node-1", "10.0.0.1:9090", LeaseId(42));
        let json = reg.encode().unwrap();
        assert!(json.contains("\"status\":\"online\""));
        assert!(json.contains("\"lease_id\":42"));
        assert_eq!(NodeRegistration::decode("/k", &json).unwrap(), reg);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = NodeRegistration::decode("/cron-lite/workers/x", "online").unwrap_err();
        assert!(matches!(err, CronError::InvalidRegistration { .. }));
    }

    #[test]
    fn key_is_prefix_plus_id() {
        assert_eq!(
            registration_key("/cron-lite/workers/", "node-3"),
            "/cron-lite/workers/node-3"
        );
    }
}
