use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Fixed election path shared by every node in the cluster.
pub const ELECTION_KEY: &str = "/cron-lite/election";

/// Registration records live under this prefix, one key per node.
pub const REGISTRY_PREFIX: &str = "/cron-lite/workers/";

/// Settings for the lease-bound session and the leader election.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Lease time-to-live. Keys and locks bound to the session vanish
    /// this long after the last successful renewal.
    pub session_ttl_ms: u64,
    /// Base delay between lock acquisition attempts while campaigning.
    /// Each wait is jittered to avoid synchronized retries.
    pub campaign_retry_ms: u64,
    /// Timeout for establishing a connection to a coordination endpoint.
    pub dial_timeout_ms: u64,
    pub election_key: String,
    pub registry_prefix: String,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            session_ttl_ms: 10_000,
            campaign_retry_ms: 200,
            dial_timeout_ms: 5_000,
            election_key: ELECTION_KEY.to_string(),
            registry_prefix: REGISTRY_PREFIX.to_string(),
        }
    }
}

impl ElectionConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms)
    }

    pub fn campaign_retry(&self) -> Duration {
        Duration::from_millis(self.campaign_retry_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn with_session_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.session_ttl_ms = ttl_ms;
        self
    }

    pub fn with_campaign_retry_ms(mut self, retry_ms: u64) -> Self {
        self.campaign_retry_ms = retry_ms;
        self
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the trigger queue. Triggers beyond it are dropped.
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
        }
    }
}

/// Leader-side dispatch settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Per-call deadline for `PushJob`, nested inside the caller's token.
    pub call_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Pooled channels unused for longer than this are closed on the next prune.
    pub max_idle_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 3_000,
            connect_timeout_ms: 1_000,
            max_idle_ms: 60_000,
        }
    }
}

impl DispatchConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }
}

/// A shell job declared on the command line as `name=command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: String,
    pub command: String,
}

impl FromStr for JobDefinition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, command) = s
            .split_once('=')
            .ok_or_else(|| format!("invalid job '{}', expected name=command", s))?;
        let name = name.trim();
        let command = command.trim();
        if name.is_empty() {
            return Err(format!("invalid job '{}', name is empty", s));
        }
        if command.is_empty() {
            return Err(format!("invalid job '{}', command is empty", s));
        }
        Ok(Self {
            name: name.to_string(),
            command: command.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub listen_addr: SocketAddr,
    /// Address other nodes use to reach this node's gRPC server (host:port).
    pub advertise_addr: String,
    pub coordinator_endpoints: Vec<String>,
    pub election: ElectionConfig,
    pub engine: EngineConfig,
    pub dispatch: DispatchConfig,
    pub jobs: Vec<JobDefinition>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let listen_addr = SocketAddr::from(([127, 0, 0, 1], 9090));
        Self {
            node_id: "node-1".to_string(),
            listen_addr,
            advertise_addr: listen_addr.to_string(),
            coordinator_endpoints: vec!["127.0.0.1:2379".to_string()],
            election: ElectionConfig::default(),
            engine: EngineConfig::default(),
            dispatch: DispatchConfig::default(),
            jobs: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            node_id: node_id.into(),
            listen_addr,
            advertise_addr: listen_addr.to_string(),
            ..Default::default()
        }
    }

    pub fn with_coordinators(mut self, endpoints: Vec<String>) -> Self {
        self.coordinator_endpoints = endpoints;
        self
    }

    pub fn with_job(mut self, name: &str, command: &str) -> Self {
        self.jobs.push(JobDefinition {
            name: name.to_string(),
            command: command.to_string(),
        });
        self
    }
}

/// Split a comma-separated endpoint list, ignoring blanks.
pub fn parse_endpoints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn election_config_default() {
        let cfg = ElectionConfig::default();
        assert_eq!(cfg.session_ttl(), Duration::from_secs(10));
        assert_eq!(cfg.election_key, "/cron-lite/election");
        assert_eq!(cfg.registry_prefix, "/cron-lite/workers/");
        assert_eq!(cfg.dial_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn engine_and_dispatch_defaults() {
        assert_eq!(EngineConfig::default().queue_capacity, 100);
        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.call_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn node_config_new_advertises_listen_addr() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = NodeConfig::new("worker-7", addr);
        assert_eq!(cfg.node_id, "worker-7");
        assert_eq!(cfg.advertise_addr, "10.0.0.1:9000");
        assert!(cfg.jobs.is_empty());
    }

    #[test]
    fn node_config_builders() {
        let cfg = NodeConfig::default()
            .with_coordinators(vec!["a:1".to_string(), "b:2".to_string()])
            .with_job("backup", "tar czf /tmp/x.tgz /data");
        assert_eq!(cfg.coordinator_endpoints.len(), 2);
        assert_eq!(cfg.jobs[0].name, "backup");
    }

    #[test]
    fn job_definition_parses_name_and_command() {
        let job: JobDefinition = "report = echo a=b".parse().unwrap();
        assert_eq!(job.name, "report");
        assert_eq!(job.command, "echo a=b");
    }

    #[test]
    fn job_definition_rejects_malformed_input() {
        assert!("no-separator".parse::<JobDefinition>().is_err());
        assert!("=echo hi".parse::<JobDefinition>().is_err());
        assert!("name=  ".parse::<JobDefinition>().is_err());
    }

    #[test]
    fn parse_endpoints_skips_blanks() {
        assert_eq!(
            parse_endpoints("127.0.0.1:2379, ,10.0.0.2:2379,"),
            vec!["127.0.0.1:2379".to_string(), "10.0.0.2:2379".to_string()]
        );
        assert!(parse_endpoints("").is_empty());
    }
}
