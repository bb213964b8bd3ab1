//! # meshkv
//!
//! A small peer-to-peer replicated key-value store:
//! - Durable append-only text log, replayed on restart
//! - Length-prefixed text protocol for clients
//! - Best-effort broadcast of every local write to all known peers
//! - Snapshot bootstrap from a seed node before serving
//! - UDP gossip for peer discovery and failure detection
//!
//! ## Architecture
//!
//! ```text
//!   clients ──frames──▶ client endpoint ──▶ Database (log + store)
//!                                              │ commit order
//!                                              ▼
//!                                       replication queue ──▶ Broadcaster ──▶ peers
//!                                                                  ▲
//!   peers ──tagged frames──▶ replication endpoint                 │ peer list
//!                             (set / bootstrap)          gossip membership
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # First node
//! meshkv-node --client-addr 127.0.0.1:9000 --replication-addr 127.0.0.1:9001 --log-path a.log
//!
//! # Second node, bootstrapped from the first
//! meshkv-node --client-addr 127.0.0.1:9100 --replication-addr 127.0.0.1:9101 \
//!   --log-path b.log --seed 127.0.0.1:9001
//!
//! meshkv --addr 127.0.0.1:9100 set a 1
//! meshkv --addr 127.0.0.1:9000 get a
//! ```

#![allow(clippy::result_large_err)]

pub mod client;
pub mod common;
pub mod membership;
pub mod node;
pub mod protocol;
pub mod replication;
pub mod storage;

// Re-export commonly used types
pub use client::KvClient;
pub use common::{Error, NodeConfig, Result};
pub use node::{Node, NodeHandle, NodeState};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
