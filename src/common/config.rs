//! Configuration for meshkv nodes

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix (e.g. `MESHKV_CLIENT_ADDR`)
pub const ENV_PREFIX: &str = "MESHKV";

/// Node configuration
///
/// Loaded from an optional TOML file, then `MESHKV_*` environment variables.
/// The node binary applies command-line overrides on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node ID (unique identifier, used by gossip)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Bind address for the client protocol
    #[serde(default = "default_client_addr")]
    pub client_addr: SocketAddr,

    /// Bind address for inbound replication connections
    #[serde(default = "default_replication_addr")]
    pub replication_addr: SocketAddr,

    /// UDP bind address for gossip.
    /// When unset, gossip binds the replication address (same port, UDP).
    #[serde(default)]
    pub gossip_addr: Option<SocketAddr>,

    /// Replication address of the seed peer to bootstrap from
    #[serde(default)]
    pub seed: Option<SocketAddr>,

    /// Durable log file
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Durable log sync policy
    #[serde(default)]
    pub sync_policy: SyncPolicy,

    /// Connect/send timeout per peer during broadcast
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout_ms: u64,

    /// Deadline for the whole bootstrap transfer
    #[serde(default = "default_bootstrap_timeout")]
    pub bootstrap_timeout_ms: u64,

    /// Gossip round interval
    #[serde(default = "default_gossip_interval")]
    pub gossip_interval_ms: u64,

    /// Silence before an alive member becomes suspect
    #[serde(default = "default_suspect_timeout")]
    pub suspect_timeout_ms: u64,

    /// Silence before a member is declared dead
    #[serde(default = "default_dead_timeout")]
    pub dead_timeout_ms: u64,

    /// Consecutive accept failures tolerated before a listener gives up
    #[serde(default = "default_max_accept_failures")]
    pub max_accept_failures: u32,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
fn default_client_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}
fn default_replication_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9001))
}
fn default_log_path() -> PathBuf {
    PathBuf::from("kv.log")
}
fn default_peer_timeout() -> u64 {
    2_000
}
fn default_bootstrap_timeout() -> u64 {
    10_000
}
fn default_gossip_interval() -> u64 {
    500
}
fn default_suspect_timeout() -> u64 {
    5_000
}
fn default_dead_timeout() -> u64 {
    10_000
}
fn default_max_accept_failures() -> u32 {
    64
}
fn default_log_level() -> String {
    "info".to_string()
}

/// When the durable log reaches stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// Flush and fsync on every append (before the write is acknowledged)
    #[default]
    Always,
    /// Flush to the OS only
    Flush,
}

impl std::str::FromStr for SyncPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(SyncPolicy::Always),
            "flush" => Ok(SyncPolicy::Flush),
            other => Err(Error::InvalidConfig(format!(
                "unknown sync policy: {} (expected always|flush)",
                other
            ))),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            client_addr: default_client_addr(),
            replication_addr: default_replication_addr(),
            gossip_addr: None,
            seed: None,
            log_path: default_log_path(),
            sync_policy: SyncPolicy::default(),
            peer_timeout_ms: default_peer_timeout(),
            bootstrap_timeout_ms: default_bootstrap_timeout(),
            gossip_interval_ms: default_gossip_interval(),
            suspect_timeout_ms: default_suspect_timeout(),
            dead_timeout_ms: default_dead_timeout(),
            max_accept_failures: default_max_accept_failures(),
            log_level: default_log_level(),
        }
    }
}

impl NodeConfig {
    /// Load config from an optional TOML file, then `MESHKV_*` env vars.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        let config: NodeConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("peer_timeout_ms", self.peer_timeout_ms),
            ("bootstrap_timeout_ms", self.bootstrap_timeout_ms),
            ("gossip_interval_ms", self.gossip_interval_ms),
            ("suspect_timeout_ms", self.suspect_timeout_ms),
            ("dead_timeout_ms", self.dead_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{} must be positive", name)));
            }
        }
        if self.dead_timeout_ms < self.suspect_timeout_ms {
            return Err(Error::InvalidConfig(
                "dead_timeout_ms must not be shorter than suspect_timeout_ms".into(),
            ));
        }
        if self.max_accept_failures == 0 {
            return Err(Error::InvalidConfig(
                "max_accept_failures must be positive".into(),
            ));
        }
        if self.seed.is_some() && self.seed == Some(self.replication_addr) {
            return Err(Error::InvalidConfig(
                "seed must not be this node's own replication address".into(),
            ));
        }
        if self.client_addr == self.replication_addr && self.client_addr.port() != 0 {
            return Err(Error::InvalidConfig(
                "client and replication endpoints must differ".into(),
            ));
        }
        Ok(())
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }

    pub fn suspect_timeout(&self) -> Duration {
        Duration::from_millis(self.suspect_timeout_ms)
    }

    pub fn dead_timeout(&self) -> Duration {
        Duration::from_millis(self.dead_timeout_ms)
    }
}
