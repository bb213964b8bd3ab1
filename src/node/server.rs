//! Node composition and startup/shutdown orchestration

use crate::common::{AcceptFailures, NodeConfig, Result};
use crate::membership::{GossipMembership, GossipSettings, NodeId, PeerSource};
use crate::node::handler::ClientRequestHandler;
use crate::node::state::{Lifecycle, NodeState};
use crate::replication::{replication_queue, BootstrapClient, Broadcaster, ReplicationListener};
use crate::storage::Database;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A node that has not been started yet.
pub struct Node {
    config: NodeConfig,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Recover, bootstrap if seeded, join gossip, and open the client
    /// endpoint. Returns once the node is serving.
    ///
    /// Any failure before `Serving` is fatal: whatever was already started
    /// is stopped again and the error returned.
    pub async fn start(self) -> Result<NodeHandle> {
        let config = self.config;
        config.validate()?;

        let lifecycle = Arc::new(Lifecycle::new());
        let (shutdown, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown);

        tracing::info!("Starting meshkv node {}", config.node_id);
        tracing::info!("  Client endpoint: {}", config.client_addr);
        tracing::info!("  Replication endpoint: {}", config.replication_addr);
        tracing::info!("  Durable log: {}", config.log_path.display());

        // Recovery
        lifecycle.advance(NodeState::Recovering)?;
        let db = Arc::new(Database::open(&config.log_path, config.sync_policy)?);

        // Replication listener; refuses bootstrap requests until serving
        let listener = ReplicationListener::bind(
            config.replication_addr,
            db.clone(),
            lifecycle.subscribe(),
            config.peer_timeout(),
            config.max_accept_failures,
        )
        .await?;
        let replication_addr = listener.local_addr()?;
        let mut tasks = vec![spawn_fatal(
            "replication listener",
            shutdown.clone(),
            listener.run(shutdown.subscribe()),
        )];

        // Bootstrap
        if let Some(seed) = config.seed {
            lifecycle.advance(NodeState::Bootstrapping)?;
            let client = BootstrapClient::new(seed, config.bootstrap_timeout());
            if let Err(e) = client.run(&db).await {
                tracing::error!("Bootstrap failed: {}", e);
                abort_startup(&lifecycle, &shutdown, tasks).await;
                return Err(e);
            }
        }

        // Membership
        let gossip_addr = config.gossip_addr.unwrap_or(replication_addr);
        let membership = match GossipMembership::bind(
            NodeId(config.node_id.clone()),
            gossip_addr,
            replication_addr,
            GossipSettings::from(&config),
        )
        .await
        {
            Ok(membership) => membership,
            Err(e) => {
                abort_startup(&lifecycle, &shutdown, tasks).await;
                return Err(e);
            }
        };
        if let Some(seed) = config.seed {
            membership.seed(seed);
        }
        membership.start();

        // Broadcaster
        let (queue_tx, queue_rx) = replication_queue();
        let peers: Arc<dyn PeerSource> = membership.clone();
        let broadcaster = Broadcaster::new(peers, config.peer_timeout());
        let broadcast_shutdown = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            broadcaster.run(queue_rx, broadcast_shutdown).await;
            Ok(())
        }));

        // Client endpoint
        let client_listener = match TcpListener::bind(config.client_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                membership.stop().await;
                abort_startup(&lifecycle, &shutdown, tasks).await;
                return Err(e.into());
            }
        };
        let client_addr = client_listener.local_addr()?;
        lifecycle.advance(NodeState::Serving)?;

        let handler = ClientRequestHandler::new(db.clone(), queue_tx);
        tasks.push(spawn_fatal(
            "client listener",
            shutdown.clone(),
            client_loop(
                client_listener,
                handler,
                lifecycle.subscribe(),
                shutdown.subscribe(),
                config.max_accept_failures,
            ),
        ));

        tracing::info!(
            "✓ Node {} serving: client {}, replication {}, gossip {}, {} keys",
            config.node_id,
            client_addr,
            replication_addr,
            membership.local_addr(),
            db.len()
        );

        Ok(NodeHandle {
            client_addr,
            replication_addr,
            lifecycle,
            db,
            membership,
            shutdown,
            tasks,
        })
    }
}

/// A running node.
pub struct NodeHandle {
    client_addr: SocketAddr,
    replication_addr: SocketAddr,
    lifecycle: Arc<Lifecycle>,
    db: Arc<Database>,
    membership: Arc<GossipMembership>,
    shutdown: Arc<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<Result<()>>>,
}

impl NodeHandle {
    /// Bound client endpoint (resolved if configured with port 0).
    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn replication_addr(&self) -> SocketAddr {
        self.replication_addr
    }

    pub fn gossip_addr(&self) -> SocketAddr {
        self.membership.local_addr()
    }

    pub fn state(&self) -> NodeState {
        self.lifecycle.current()
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn membership(&self) -> &Arc<GossipMembership> {
        &self.membership
    }

    /// Begin orderly shutdown. Endpoints stop accepting and open
    /// connections finish their current request.
    pub fn shutdown(&self) {
        if self.lifecycle.advance(NodeState::ShuttingDown).is_ok() {
            self.shutdown.send_replace(true);
        }
    }

    /// Wait for every node task to finish, then mark the node stopped.
    /// Returns the first fatal task error, if any.
    pub async fn wait(self) -> Result<()> {
        let mut outcome = Ok(());
        for task in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
                Err(e) => tracing::error!("Node task panicked: {}", e),
            }
        }
        self.membership.stop().await;
        // Shutdown may have been triggered by a fatal task rather than `shutdown()`.
        let _ = self.lifecycle.advance(NodeState::ShuttingDown);
        self.lifecycle.advance(NodeState::Stopped)?;
        tracing::info!("Node stopped");
        outcome
    }

    /// Serve until `signal` resolves (or a task fails), then shut down.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut stopped = self.shutdown.subscribe();
        tokio::select! {
            _ = signal => tracing::info!("Shutdown requested"),
            _ = stopped.wait_for(|stop| *stop) => tracing::warn!("Node stopping after a fatal error"),
        }
        self.shutdown();
        self.wait().await
    }
}

/// Spawn a node task whose failure takes the whole node down.
fn spawn_fatal<F>(
    name: &'static str,
    shutdown: Arc<watch::Sender<bool>>,
    task: F,
) -> JoinHandle<Result<()>>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = task.await;
        if let Err(e) = &result {
            tracing::error!("Fatal error in {}: {}", name, e);
            shutdown.send_replace(true);
        }
        result
    })
}

async fn abort_startup(
    lifecycle: &Lifecycle,
    shutdown: &watch::Sender<bool>,
    tasks: Vec<JoinHandle<Result<()>>>,
) {
    let _ = lifecycle.advance(NodeState::ShuttingDown);
    shutdown.send_replace(true);
    for task in tasks {
        let _ = task.await;
    }
    let _ = lifecycle.advance(NodeState::Stopped);
}

async fn client_loop(
    listener: TcpListener,
    handler: ClientRequestHandler,
    state: watch::Receiver<NodeState>,
    mut shutdown: watch::Receiver<bool>,
    max_accept_failures: u32,
) -> Result<()> {
    let mut failures = AcceptFailures::new("Client", max_accept_failures);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    failures.reset();
                    if !state.borrow().accepts_clients() {
                        tracing::warn!("Dropping client {} while not serving", peer);
                        continue;
                    }
                    let handler = handler.clone();
                    let conn_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handler.run(stream, peer, conn_shutdown).await {
                            tracing::warn!("Client {} connection error: {}", peer, e);
                        }
                    });
                }
                Err(e) => failures.record(e).await?,
            },
        }
    }
    tracing::info!("Client listener closed");
    Ok(())
}
