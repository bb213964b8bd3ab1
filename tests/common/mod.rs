//! Shared helpers for node-level tests

#![allow(dead_code)]

use meshkv::common::SyncPolicy;
use meshkv::{KvClient, Node, NodeConfig, NodeHandle};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Config on ephemeral ports with fast gossip.
pub fn node_config(log_path: &Path) -> NodeConfig {
    NodeConfig {
        client_addr: "127.0.0.1:0".parse().unwrap(),
        replication_addr: "127.0.0.1:0".parse().unwrap(),
        log_path: log_path.to_path_buf(),
        sync_policy: SyncPolicy::Always,
        peer_timeout_ms: 1_000,
        bootstrap_timeout_ms: 5_000,
        gossip_interval_ms: 50,
        suspect_timeout_ms: 1_000,
        dead_timeout_ms: 2_000,
        ..Default::default()
    }
}

pub async fn start_node(log_path: &Path, seed: Option<SocketAddr>) -> NodeHandle {
    let mut config = node_config(log_path);
    config.seed = seed;
    Node::new(config).start().await.unwrap()
}

pub async fn stop_node(node: NodeHandle) {
    node.shutdown();
    node.wait().await.unwrap();
}

pub async fn client(node: &NodeHandle) -> KvClient {
    KvClient::connect(node.client_addr()).await.unwrap()
}

/// Poll `get key` on `node` until it returns `expected` or the deadline passes.
pub async fn eventually_get(node: &NodeHandle, key: &str, expected: &str) -> bool {
    let mut client = client(node).await;
    for _ in 0..100 {
        if client.get(key).await.unwrap().as_deref() == Some(expected) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Wait until `node` lists `peer` as a replication target.
pub async fn wait_for_peer(node: &NodeHandle, peer: SocketAddr) -> bool {
    use meshkv::membership::PeerSource;
    for _ in 0..100 {
        if node.membership().list_peers().contains(&peer) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
