//! Replication broadcaster
//!
//! Takes committed writes off the replication queue in FIFO order and pushes
//! each one to every peer currently known, one short-lived connection per
//! peer. Delivery is best effort: a failed or slow peer is logged and
//! skipped, never retried, and never holds up the other peers.

use crate::common::{Error, Result};
use crate::membership::{PeerAddress, PeerSource};
use crate::protocol::frame::encode_tagged_frame;
use crate::protocol::LogEntry;
use bytes::BytesMut;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Producer side of the replication queue.
pub type ReplicationSender = mpsc::UnboundedSender<LogEntry>;
/// Consumer side of the replication queue.
pub type ReplicationReceiver = mpsc::UnboundedReceiver<LogEntry>;

/// Unbounded FIFO between client handlers and the broadcaster. Producers
/// never block and never drop a committed write.
pub fn replication_queue() -> (ReplicationSender, ReplicationReceiver) {
    mpsc::unbounded_channel()
}

/// Outcome of broadcasting one entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

impl BroadcastReport {
    pub fn peers(&self) -> usize {
        self.delivered + self.failed
    }
}

pub struct Broadcaster {
    peers: Arc<dyn PeerSource>,
    peer_timeout: Duration,
}

impl Broadcaster {
    pub fn new(peers: Arc<dyn PeerSource>, peer_timeout: Duration) -> Self {
        Self {
            peers,
            peer_timeout,
        }
    }

    /// Drain the queue until shutdown or until every producer is gone.
    pub async fn run(self, mut queue: ReplicationReceiver, mut shutdown: watch::Receiver<bool>) {
        info!("Replication broadcaster started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = queue.recv() => match next {
                    Some(entry) => {
                        let report = self.broadcast(&entry).await;
                        debug!(
                            "Broadcast {:?}: {} delivered, {} failed",
                            entry.key, report.delivered, report.failed
                        );
                    }
                    None => break,
                },
            }
        }
        let mut pending = 0;
        while queue.try_recv().is_ok() {
            pending += 1;
        }
        if pending > 0 {
            warn!("Replication broadcaster stopping with {} undelivered entries", pending);
        }
        info!("Replication broadcaster stopped");
    }

    /// Send one entry to every peer known right now, concurrently.
    pub async fn broadcast(&self, entry: &LogEntry) -> BroadcastReport {
        let peers = self.peers.list_peers();
        if peers.is_empty() {
            return BroadcastReport::default();
        }

        let mut frame = BytesMut::new();
        if let Err(e) = encode_tagged_frame(&mut frame, &entry.to_string()) {
            warn!("Cannot encode {:?} for broadcast: {}", entry.key, e);
            return BroadcastReport {
                delivered: 0,
                failed: peers.len(),
            };
        }
        let frame = frame.freeze();

        let attempts = peers.iter().map(|peer| {
            let frame = frame.clone();
            async move { (*peer, deliver(*peer, &frame, self.peer_timeout).await) }
        });

        let mut report = BroadcastReport::default();
        for (peer, result) in join_all(attempts).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Replication to {} failed: {}", peer, e);
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Connect, send one frame, close; all bounded by `timeout`.
pub async fn deliver(peer: PeerAddress, frame: &[u8], timeout: Duration) -> Result<()> {
    let attempt = async {
        let mut stream = TcpStream::connect(peer)
            .await
            .map_err(|e| Error::PeerUnreachable(format!("{}: {}", peer, e)))?;
        stream.write_all(frame).await?;
        stream.shutdown().await?;
        Ok::<(), Error>(())
    };
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!("delivery to {} after {:?}", peer, timeout))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::StaticPeers;
    use crate::protocol::read_tagged_frame;
    use tokio::net::TcpListener;

    async fn capture_one(listener: TcpListener) -> String {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_tagged_frame(&mut stream).await.unwrap().unwrap()
    }

    async fn unused_addr() -> PeerAddress {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer() {
        let l1 = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let l2 = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peers = Arc::new(StaticPeers::new(vec![
            l1.local_addr().unwrap(),
            l2.local_addr().unwrap(),
        ]));
        let r1 = tokio::spawn(capture_one(l1));
        let r2 = tokio::spawn(capture_one(l2));

        let broadcaster = Broadcaster::new(peers, Duration::from_secs(2));
        let report = broadcaster.broadcast(&LogEntry::new("a", "1")).await;

        assert_eq!(report, BroadcastReport { delivered: 2, failed: 0 });
        assert_eq!(r1.await.unwrap(), "set a 1");
        assert_eq!(r2.await.unwrap(), "set a 1");
    }

    #[tokio::test]
    async fn test_unreachable_peer_does_not_block_others() {
        let good = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = unused_addr().await;
        let peers = Arc::new(StaticPeers::new(vec![dead, good.local_addr().unwrap()]));
        let received = tokio::spawn(capture_one(good));

        let broadcaster = Broadcaster::new(peers, Duration::from_millis(500));
        let report = broadcaster.broadcast(&LogEntry::new("k", "v")).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(received.await.unwrap(), "set k v");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_peer_times_out_without_blocking_others() {
        // Never accepted and never read: a frame larger than the socket
        // buffers cannot be written to completion.
        let stalled = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let good = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peers = Arc::new(StaticPeers::new(vec![
            stalled.local_addr().unwrap(),
            good.local_addr().unwrap(),
        ]));
        let received = tokio::spawn(capture_one(good));

        let peer_timeout = Duration::from_secs(1);
        let value = "x".repeat(32 << 20);
        let broadcaster = Broadcaster::new(peers, peer_timeout);

        let started = std::time::Instant::now();
        let report = broadcaster.broadcast(&LogEntry::new("big", value.clone())).await;
        assert!(started.elapsed() < peer_timeout * 4, "took {:?}", started.elapsed());

        assert_eq!(report, BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(received.await.unwrap().len(), "set big ".len() + value.len());

        let mut frame = BytesMut::new();
        encode_tagged_frame(&mut frame, &format!("set big {}", value)).unwrap();
        let direct = deliver(stalled.local_addr().unwrap(), &frame, Duration::from_millis(200)).await;
        assert!(matches!(direct, Err(Error::Timeout(_))));
        drop(stalled);
    }

    #[tokio::test]
    async fn test_peer_set_is_read_per_entry() {
        let peers = Arc::new(StaticPeers::default());
        let broadcaster = Broadcaster::new(peers.clone(), Duration::from_secs(1));
        assert_eq!(broadcaster.broadcast(&LogEntry::new("a", "1")).await.peers(), 0);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        peers.add(listener.local_addr().unwrap());
        let received = tokio::spawn(capture_one(listener));

        let report = broadcaster.broadcast(&LogEntry::new("b", "2")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(received.await.unwrap(), "set b 2");
    }

    #[tokio::test]
    async fn test_run_drains_queue_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peers = Arc::new(StaticPeers::new(vec![listener.local_addr().unwrap()]));
        let (tx, rx) = replication_queue();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(LogEntry::new("x", "1")).unwrap();
        tx.send(LogEntry::new("x", "2")).unwrap();
        drop(tx);

        let task = tokio::spawn(Broadcaster::new(peers, Duration::from_secs(2)).run(rx, shutdown_rx));

        let mut seen = Vec::new();
        for _ in 0..2 {
            let (mut stream, _) = listener.accept().await.unwrap();
            seen.push(read_tagged_frame(&mut stream).await.unwrap().unwrap());
        }
        task.await.unwrap();
        drop(shutdown_tx);

        assert_eq!(seen, vec!["set x 1".to_string(), "set x 2".to_string()]);
    }
}
