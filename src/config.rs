use std::time::Duration;

use openraft::Config;
use openraft::ConfigError;
use openraft::SnapshotPolicy;

/// Tunables of a single node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Milliseconds between heartbeats sent by the leader.
    pub heartbeat_interval: u64,

    pub election_timeout_min: u64,
    pub election_timeout_max: u64,

    /// Build a snapshot after this many log entries have been applied since the last one.
    pub snapshot_threshold: u64,

    /// Number of applied logs to keep in the log store after a snapshot is built.
    pub max_in_snapshot_log_to_keep: u64,

    /// How long a client write may wait for its entry to be committed and applied.
    ///
    /// When it elapses the outcome of the write is unknown.
    pub write_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: 500,
            election_timeout_min: 1500,
            election_timeout_max: 3000,
            snapshot_threshold: 5000,
            max_in_snapshot_log_to_keep: 1000,
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl NodeConfig {
    /// Build and validate the raft configuration.
    pub fn raft_config(&self) -> Result<Config, ConfigError> {
        let config = Config {
            cluster_name: "raft3d".to_string(),
            heartbeat_interval: self.heartbeat_interval,
            election_timeout_min: self.election_timeout_min,
            election_timeout_max: self.election_timeout_max,
            snapshot_policy: SnapshotPolicy::LogsSinceLast(self.snapshot_threshold),
            max_in_snapshot_log_to_keep: self.max_in_snapshot_log_to_keep,
            ..Default::default()
        };

        config.validate()
    }
}
