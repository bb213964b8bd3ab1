//! Two-node cluster: bootstrap, gossip discovery, write propagation

mod common;

use common::{client, eventually_get, start_node, stop_node, wait_for_peer};
use meshkv::NodeState;
use tempfile::TempDir;

#[tokio::test]
async fn test_bootstrap_then_replicate() {
    let dir = TempDir::new().unwrap();

    // Node X on its own
    let x = start_node(&dir.path().join("x.log"), None).await;
    let mut cx = client(&x).await;
    cx.set("a", "1").await.unwrap();
    assert_eq!(cx.get("a").await.unwrap().as_deref(), Some("1"));
    assert_eq!(cx.get("b").await.unwrap(), None);

    // Node Y joins through X and starts with X's data
    let y = start_node(&dir.path().join("y.log"), Some(x.replication_addr())).await;
    assert_eq!(y.state(), NodeState::Serving);
    let mut cy = client(&y).await;
    assert_eq!(cy.get("a").await.unwrap().as_deref(), Some("1"));

    // Once X knows about Y, writes on Y reach X
    assert!(wait_for_peer(&y, x.replication_addr()).await);
    assert!(wait_for_peer(&x, y.replication_addr()).await);
    cy.set("c", "3").await.unwrap();
    assert!(eventually_get(&x, "c", "3").await);

    // ...and writes on X reach Y
    cx.set("d", "4").await.unwrap();
    assert!(eventually_get(&y, "d", "4").await);

    stop_node(y).await;
    stop_node(x).await;
}

#[tokio::test]
async fn test_joiner_survives_restart_with_bootstrapped_data() {
    let dir = TempDir::new().unwrap();
    let y_log = dir.path().join("y.log");

    let x = start_node(&dir.path().join("x.log"), None).await;
    client(&x).await.set("k", "v").await.unwrap();

    let y = start_node(&y_log, Some(x.replication_addr())).await;
    stop_node(y).await;
    stop_node(x).await;

    // Y restarts alone and still has what it bootstrapped
    let y = start_node(&y_log, None).await;
    assert_eq!(client(&y).await.get("k").await.unwrap().as_deref(), Some("v"));
    stop_node(y).await;
}

#[tokio::test]
async fn test_peer_down_does_not_block_writes() {
    let dir = TempDir::new().unwrap();

    let x = start_node(&dir.path().join("x.log"), None).await;
    let y = start_node(&dir.path().join("y.log"), Some(x.replication_addr())).await;
    assert!(wait_for_peer(&x, y.replication_addr()).await);
    stop_node(y).await;

    // Y is still listed until gossip ages it out; writes must succeed anyway
    let mut cx = client(&x).await;
    for i in 0..5 {
        cx.set(&format!("k{}", i), "v").await.unwrap();
    }
    assert_eq!(cx.get("k4").await.unwrap().as_deref(), Some("v"));
    stop_node(x).await;
}
