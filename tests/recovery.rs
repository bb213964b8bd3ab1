//! Restart recovery from the durable log

mod common;

use common::{client, start_node, stop_node};
use std::io::Write;
use tempfile::TempDir;

#[tokio::test]
async fn test_restart_restores_last_value() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("kv.log");

    let node = start_node(&log, None).await;
    let mut c = client(&node).await;
    c.set("a", "1").await.unwrap();
    c.set("b", "2").await.unwrap();
    c.set("a", "3").await.unwrap();
    drop(c);
    stop_node(node).await;

    let node = start_node(&log, None).await;
    assert_eq!(node.database().recovered(), 3);
    let mut c = client(&node).await;
    assert_eq!(c.get("a").await.unwrap().as_deref(), Some("3"));
    assert_eq!(c.get("b").await.unwrap().as_deref(), Some("2"));
    stop_node(node).await;
}

#[tokio::test]
async fn test_restart_after_torn_write() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("kv.log");
    std::fs::write(&log, "set a 1\nset b 2\nset c").unwrap();

    let node = start_node(&log, None).await;
    let mut c = client(&node).await;
    assert_eq!(c.get("a").await.unwrap().as_deref(), Some("1"));
    assert_eq!(c.get("b").await.unwrap().as_deref(), Some("2"));
    assert_eq!(c.get("c").await.unwrap(), None);

    // New writes land after the last complete line
    c.set("d", "4").await.unwrap();
    drop(c);
    stop_node(node).await;

    let contents = std::fs::read_to_string(&log).unwrap();
    assert_eq!(contents, "set a 1\nset b 2\nset d 4\n");
}

#[tokio::test]
async fn test_malformed_lines_skipped() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("kv.log");
    {
        let mut f = std::fs::File::create(&log).unwrap();
        writeln!(f, "set a 1").unwrap();
        writeln!(f, "garbage line here").unwrap();
        writeln!(f, "set b").unwrap();
        writeln!(f, "set b 2").unwrap();
    }

    let node = start_node(&log, None).await;
    assert_eq!(node.database().len(), 2);
    stop_node(node).await;
}

#[tokio::test]
async fn test_missing_log_starts_empty() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("nested").join("kv.log");

    let node = start_node(&log, None).await;
    assert!(node.database().is_empty());
    assert_eq!(client(&node).await.get("a").await.unwrap(), None);
    stop_node(node).await;
    assert!(log.exists());
}
