//! Replication listener
//!
//! Separate endpoint for peers. Every inbound connection carries exactly one
//! tagged frame:
//! - `bootstrap`: answered with `[COUNT:u32]` followed by COUNT tagged
//!   `set <key> <value>` frames taken from one atomic snapshot
//! - `set <key> <value>`: applied to the store (no log, no re-broadcast)
//! - anything else: logged and dropped
//!
//! Each connection runs on its own task, so one slow peer never stalls the
//! accept loop.

use crate::common::{blocking_section, AcceptFailures, Error, Result};
use crate::node::state::NodeState;
use crate::protocol::frame::encode_tagged_frame;
use crate::protocol::{read_tagged_frame, ReplicationRequest};
use crate::storage::Database;
use bytes::{BufMut, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct ReplicationListener {
    listener: TcpListener,
    db: Arc<Database>,
    state: watch::Receiver<NodeState>,
    read_timeout: Duration,
    max_accept_failures: u32,
}

impl ReplicationListener {
    pub async fn bind(
        addr: SocketAddr,
        db: Arc<Database>,
        state: watch::Receiver<NodeState>,
        read_timeout: Duration,
        max_accept_failures: u32,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Replication listener on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            db,
            state,
            read_timeout,
            max_accept_failures,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until shutdown. Returns an error only when accepting has
    /// failed too many times in a row. The socket closes when this returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let ReplicationListener {
            listener,
            db,
            state,
            read_timeout,
            max_accept_failures,
        } = self;
        let mut failures = AcceptFailures::new("Replication", max_accept_failures);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        failures.reset();
                        let db = db.clone();
                        let state = *state.borrow();
                        tokio::spawn(async move {
                            if let Err(e) = handle_peer(stream, peer, db, state, read_timeout).await {
                                warn!("Replication connection from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => failures.record(e).await?,
                },
            }
        }

        info!("Replication listener closed");
        Ok(())
    }
}

/// Serve one inbound replication connection to completion.
pub async fn handle_peer(
    mut stream: TcpStream,
    peer: SocketAddr,
    db: Arc<Database>,
    state: NodeState,
    read_timeout: Duration,
) -> Result<()> {
    let frame = tokio::time::timeout(read_timeout, read_tagged_frame(&mut stream))
        .await
        .map_err(|_| Error::Timeout(format!("no replication frame from {}", peer)))??;

    let Some(text) = frame else {
        debug!("Replication connection from {} closed without a message", peer);
        return Ok(());
    };

    match ReplicationRequest::parse(&text) {
        ReplicationRequest::Bootstrap => {
            if !state.serves_bootstrap() {
                warn!("Refusing bootstrap from {} while {}", peer, state);
                return Ok(());
            }
            serve_bootstrap(&mut stream, peer, &db).await
        }
        ReplicationRequest::Set(entry) => {
            debug!("Peer {} set {:?}", peer, entry.key);
            db.apply_remote(entry);
            Ok(())
        }
        ReplicationRequest::Unknown(raw) => {
            warn!("Ignoring unknown replication message from {}: {:?}", peer, raw);
            Ok(())
        }
    }
}

async fn serve_bootstrap(stream: &mut TcpStream, peer: SocketAddr, db: &Database) -> Result<()> {
    let snapshot = blocking_section(|| db.checkpoint_snapshot());
    info!("Bootstrapping {} with {} entries", peer, snapshot.len());

    let count = u32::try_from(snapshot.len())
        .map_err(|_| Error::Protocol(format!("snapshot too large: {} entries", snapshot.len())))?;

    let mut buf = BytesMut::new();
    buf.put_u32(count);
    for entry in snapshot.entries() {
        encode_tagged_frame(&mut buf, &entry.to_string())?;
    }
    stream.write_all(&buf).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SyncPolicy;
    use crate::protocol::{read_u32, write_tagged_frame, LogEntry};
    use tempfile::TempDir;

    async fn start(state: NodeState) -> (TempDir, Arc<Database>, SocketAddr, watch::Sender<bool>) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(dir.path().join("kv.log"), SyncPolicy::Always).unwrap());
        let (_state_tx, state_rx) = watch::channel(state);
        let listener = ReplicationListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            db.clone(),
            state_rx,
            Duration::from_secs(2),
            8,
        )
        .await
        .unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(listener.run(shutdown_rx));
        (dir, db, addr, shutdown_tx)
    }

    async fn send_one(addr: SocketAddr, text: &str) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_tagged_frame(&mut stream, text).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    async fn wait_for(db: &Database, key: &str) -> Option<String> {
        for _ in 0..100 {
            if let Some(v) = db.get(key) {
                return Some(v);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[tokio::test]
    async fn test_remote_set_applied_twice_is_idempotent() {
        let (_dir, db, addr, _shutdown) = start(NodeState::Serving).await;
        send_one(addr, "set a 1").await;
        assert_eq!(wait_for(&db, "a").await.as_deref(), Some("1"));

        send_one(addr, "set a 1").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(db.len(), 1);
        assert_eq!(db.get("a").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_garbage_does_not_stop_listener() {
        let (_dir, db, addr, _shutdown) = start(NodeState::Serving).await;
        send_one(addr, "get a").await;
        send_one(addr, "hello there").await;

        // Raw bytes with an unknown frame kind.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&[0x42, 0, 0, 0, 1, b'x']).await.unwrap();
        drop(stream);

        send_one(addr, "set b 2").await;
        assert_eq!(wait_for(&db, "b").await.as_deref(), Some("2"));
        assert_eq!(db.len(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_returns_full_snapshot() {
        let (_dir, db, addr, _shutdown) = start(NodeState::Serving).await;
        db.commit(LogEntry::new("a", "1"), |_| {}).unwrap();
        db.apply_remote(LogEntry::new("b", "2"));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_tagged_frame(&mut stream, "BOOTSTRAP").await.unwrap();

        let count = read_u32(&mut stream).await.unwrap().unwrap();
        assert_eq!(count, 2);
        let mut lines = Vec::new();
        for _ in 0..count {
            lines.push(read_tagged_frame(&mut stream).await.unwrap().unwrap());
        }
        assert_eq!(lines, vec!["set a 1".to_string(), "set b 2".to_string()]);
    }

    async fn fetch_snapshot(addr: SocketAddr) -> Vec<LogEntry> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_tagged_frame(&mut stream, "bootstrap").await.unwrap();
        let count = read_u32(&mut stream).await.unwrap().unwrap();
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let text = read_tagged_frame(&mut stream).await.unwrap().unwrap();
            entries.push(LogEntry::parse(&text).unwrap());
        }
        entries
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_snapshots_consistent_under_concurrent_writes() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        let (_dir, db, addr, _shutdown) = start(NodeState::Serving).await;
        let acked = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        // Writes k<i> = i, then latest = i, for increasing i.
        let writer = {
            let (db, acked, stop) = (db.clone(), acked.clone(), stop.clone());
            std::thread::spawn(move || {
                let mut i = 0usize;
                while !stop.load(Ordering::Acquire) {
                    db.commit(LogEntry::new(format!("k{:08}", i), i.to_string()), |_| {})
                        .unwrap();
                    db.commit(LogEntry::new("latest", i.to_string()), |_| {})
                        .unwrap();
                    i += 1;
                    acked.store(i, Ordering::Release);
                }
            })
        };
        while acked.load(Ordering::Acquire) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        for _ in 0..10 {
            let acked_before = acked.load(Ordering::Acquire);
            let entries = fetch_snapshot(addr).await;

            let mut latest = None;
            let mut indexes = Vec::new();
            for entry in &entries {
                let value: usize = entry.value.parse().unwrap();
                if entry.key == "latest" {
                    latest = Some(value);
                } else {
                    assert_eq!(entry.key, format!("k{:08}", value), "torn entry {:?}", entry);
                    indexes.push(value);
                }
            }

            // Keys form a gap-free prefix that covers every acknowledged write.
            let written = indexes.len();
            assert_eq!(indexes, (0..written).collect::<Vec<_>>());
            assert!(written >= acked_before, "{} < {}", written, acked_before);

            // `latest` lags the newest key by at most the one in-flight write.
            match latest {
                None => assert!(written <= 1),
                Some(l) => assert!(
                    l + 1 == written || l + 2 == written,
                    "latest {} with {} keys",
                    l,
                    written
                ),
            }

            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        stop.store(true, Ordering::Release);
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_refused_while_bootstrapping() {
        let (_dir, db, addr, _shutdown) = start(NodeState::Bootstrapping).await;
        db.apply_remote(LogEntry::new("a", "1"));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_tagged_frame(&mut stream, "bootstrap").await.unwrap();
        assert!(read_u32(&mut stream).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_endpoint() {
        let (_dir, _db, addr, shutdown) = start(NodeState::Serving).await;
        shutdown.send_replace(true);

        let mut refused = false;
        for _ in 0..50 {
            if TcpStream::connect(addr).await.is_err() {
                refused = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(refused);
    }
}
