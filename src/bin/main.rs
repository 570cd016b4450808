use std::time::Duration;

use clap::Parser;
use raft3d::config::NodeConfig;
use raft3d::start_raft_node;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Opt {
    #[clap(long, env = "RAFT3D_ID")]
    pub id: u64,

    /// Address to serve the HTTP API and the raft RPC on, also advertised to peers.
    #[clap(long, env = "RAFT3D_HTTP_ADDR")]
    pub http_addr: String,

    #[clap(long, env = "RAFT3D_HEARTBEAT_INTERVAL_MS", default_value_t = 500)]
    pub heartbeat_interval: u64,

    #[clap(long, env = "RAFT3D_ELECTION_TIMEOUT_MIN_MS", default_value_t = 1500)]
    pub election_timeout_min: u64,

    #[clap(long, env = "RAFT3D_ELECTION_TIMEOUT_MAX_MS", default_value_t = 3000)]
    pub election_timeout_max: u64,

    /// Build a snapshot every this many applied log entries.
    #[clap(long, env = "RAFT3D_SNAPSHOT_THRESHOLD", default_value_t = 5000)]
    pub snapshot_threshold: u64,

    #[clap(long, env = "RAFT3D_MAX_IN_SNAPSHOT_LOG_TO_KEEP", default_value_t = 1000)]
    pub max_in_snapshot_log_to_keep: u64,

    /// Milliseconds a client write waits to be applied before failing with a timeout.
    #[clap(long, env = "RAFT3D_WRITE_TIMEOUT_MS", default_value_t = 5000)]
    pub write_timeout: u64,
}

impl Opt {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            heartbeat_interval: self.heartbeat_interval,
            election_timeout_min: self.election_timeout_min,
            election_timeout_max: self.election_timeout_max,
            snapshot_threshold: self.snapshot_threshold,
            max_in_snapshot_log_to_keep: self.max_in_snapshot_log_to_keep,
            write_timeout: Duration::from_millis(self.write_timeout),
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Setup the logger
    tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Parse the parameters passed by arguments.
    let options = Opt::parse();

    start_raft_node(options.id, options.http_addr.clone(), options.node_config()).await
}
