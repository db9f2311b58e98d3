//! Startup configuration: defaults, overridden by an optional TOML file and
//! then by environment variables, mirroring how `nakamoto-node::run()`
//! built its `p2p::protocol::bitcoin::Config` from defaults before handing
//! it to the reactor.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use headers_common::Chain;
use headers_p2p::PoolConfig;

/// Top-level node configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which Bitcoin-family chain to sync.
    pub chain: String,
    /// Peers to connect to immediately, bypassing rating-based selection.
    pub connect: Vec<SocketAddr>,
    /// HTTPS endpoint consulted when the known address database runs thin.
    pub bootstrap_url: Option<String>,
    /// Number of concurrent verified sessions to maintain.
    pub target_num_connections: usize,
    /// Number of worker tasks used to reach `target_num_connections`.
    pub num_workers: usize,
    /// Health-monitor cycle length, in seconds.
    pub health_cycle_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chain: "bsv".to_string(),
            connect: Vec::new(),
            bootstrap_url: None,
            target_num_connections: PoolConfig::default().target_num_connections,
            num_workers: PoolConfig::default().num_workers,
            health_cycle_secs: PoolConfig::default().health_cycle.as_secs(),
        }
    }
}

impl Config {
    /// Load defaults, overridden by `path` (if it exists) and then by
    /// environment variables (`HEADERS_NODE_*`).
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut cfg = match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e.into()),
        };

        if let Ok(chain) = std::env::var("HEADERS_NODE_CHAIN") {
            cfg.chain = chain;
        }
        if let Ok(url) = std::env::var("HEADERS_NODE_BOOTSTRAP_URL") {
            cfg.bootstrap_url = Some(url);
        }
        if let Ok(n) = std::env::var("HEADERS_NODE_TARGET_CONNECTIONS") {
            cfg.target_num_connections = n.parse()?;
        }
        if let Ok(n) = std::env::var("HEADERS_NODE_NUM_WORKERS") {
            cfg.num_workers = n.parse()?;
        }

        Ok(cfg)
    }

    /// Resolve the configured chain name.
    pub fn resolved_chain(&self) -> anyhow::Result<Chain> {
        self.chain
            .parse::<Chain>()
            .map_err(|e: headers_common::network::UnknownChain| e.into())
    }

    /// The pool configuration this node's settings imply.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            target_num_connections: self.target_num_connections,
            num_workers: self.num_workers,
            health_cycle: Duration::from_secs(self.health_cycle_secs),
            ..PoolConfig::default()
        }
    }
}
