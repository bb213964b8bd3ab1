use anyhow::Result;
use clap::Parser;
use meshkv::common::{as_millis_u64, parse_duration, NodeConfig, SyncPolicy};
use meshkv::Node;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "meshkv-node")]
#[command(about = "meshkv node - replicated key-value store peer")]
#[command(version)]
struct Args {
    /// TOML config file (MESHKV_* env vars and flags override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node ID (defaults to a random UUID)
    #[arg(long)]
    node_id: Option<String>,

    /// Client endpoint address
    #[arg(long)]
    client_addr: Option<SocketAddr>,

    /// Replication endpoint address
    #[arg(long)]
    replication_addr: Option<SocketAddr>,

    /// Gossip UDP address (defaults to the replication address)
    #[arg(long)]
    gossip_addr: Option<SocketAddr>,

    /// Replication address of a seed node to bootstrap from
    #[arg(short, long)]
    seed: Option<SocketAddr>,

    /// Durable log file
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Log sync policy (always, flush)
    #[arg(long)]
    sync_policy: Option<SyncPolicy>,

    /// Per-peer replication timeout (e.g. 500ms, 2s)
    #[arg(long, value_parser = parse_duration)]
    peer_timeout: Option<Duration>,

    /// Deadline for the bootstrap transfer (e.g. 10s)
    #[arg(long, value_parser = parse_duration)]
    bootstrap_timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(self, config: &mut NodeConfig) {
        if let Some(v) = self.node_id {
            config.node_id = v;
        }
        if let Some(v) = self.client_addr {
            config.client_addr = v;
        }
        if let Some(v) = self.replication_addr {
            config.replication_addr = v;
        }
        if self.gossip_addr.is_some() {
            config.gossip_addr = self.gossip_addr;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(v) = self.log_path {
            config.log_path = v;
        }
        if let Some(v) = self.sync_policy {
            config.sync_policy = v;
        }
        if let Some(v) = self.peer_timeout {
            config.peer_timeout_ms = as_millis_u64(v);
        }
        if let Some(v) = self.bootstrap_timeout {
            config.bootstrap_timeout_ms = as_millis_u64(v);
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("meshkv {}", meshkv::VERSION);
    if let Some(seed) = config.seed {
        tracing::info!("Seed: {}", seed);
    }

    let node = Node::new(config).start().await?;
    node.run_until(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
