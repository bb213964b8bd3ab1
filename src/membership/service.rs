use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::types::{GossipMessage, Member, MemberState, NodeId, PeerAddress, PeerSource};
use crate::common::{NodeConfig, Result};

const MAX_DATAGRAM: usize = 65_507;
/// Dead members are forgotten after this many dead timeouts of silence.
const PRUNE_FACTOR: u32 = 3;

/// Timing knobs for the gossip loops.
#[derive(Debug, Clone, Copy)]
pub struct GossipSettings {
    pub interval: Duration,
    pub suspect_timeout: Duration,
    pub dead_timeout: Duration,
}

impl Default for GossipSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            suspect_timeout: Duration::from_secs(5),
            dead_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&NodeConfig> for GossipSettings {
    fn from(config: &NodeConfig) -> Self {
        Self {
            interval: config.gossip_interval(),
            suspect_timeout: config.suspect_timeout(),
            dead_timeout: config.dead_timeout(),
        }
    }
}

/// UDP gossip membership.
///
/// Each round the node pings one random live member (or re-sends `Join` to
/// its seeds while it knows nobody) and ages members it has not heard from.
pub struct GossipMembership {
    local: Member,
    members: DashMap<NodeId, Member>,
    socket: UdpSocket,
    seeds: Mutex<Vec<SocketAddr>>,
    settings: GossipSettings,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GossipMembership {
    /// Bind the gossip socket. Nothing is sent until [`start`](Self::start).
    pub async fn bind(
        id: NodeId,
        gossip_addr: SocketAddr,
        replication_addr: PeerAddress,
        settings: GossipSettings,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(gossip_addr).await?;
        let local = Member {
            id,
            gossip_addr: socket.local_addr()?,
            replication_addr,
            state: MemberState::Alive,
            last_seen: Some(Instant::now()),
        };
        let (shutdown, _) = watch::channel(false);

        info!("Gossip bound on {} for node {}", local.gossip_addr, local.id);

        Ok(Arc::new(Self {
            local,
            members: DashMap::new(),
            socket,
            seeds: Mutex::new(Vec::new()),
            settings,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn local(&self) -> &Member {
        &self.local
    }

    /// Address of the gossip socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local.gossip_addr
    }

    /// Join the cluster through a known peer's gossip address.
    pub fn seed(&self, addr: SocketAddr) {
        let mut seeds = self.seeds.lock().unwrap_or_else(PoisonError::into_inner);
        if addr != self.local.gossip_addr && !seeds.contains(&addr) {
            info!("Gossip seed {}", addr);
            seeds.push(addr);
        }
    }

    /// Spawn the gossip and receive loops.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return;
        }

        let service = self.clone();
        let shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            service.gossip_loop(shutdown).await;
        }));

        let service = self.clone();
        let shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            service.receive_loop(shutdown).await;
        }));

        info!("Gossip membership started");
    }

    /// Stop both loops and wait for them to exit.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("Gossip membership stopped");
    }

    pub fn alive_members(&self) -> Vec<Member> {
        self.members
            .iter()
            .filter(|e| e.value().is_alive())
            .map(|e| e.value().clone())
            .collect()
    }

    async fn gossip_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    self.detect_failures(Instant::now());
                    self.gossip_round().await;
                }
            }
        }
    }

    async fn gossip_round(&self) {
        let targets: Vec<SocketAddr> = self
            .members
            .iter()
            .filter(|e| e.value().state != MemberState::Dead)
            .map(|e| e.value().gossip_addr)
            .collect();

        if self.alive_members().is_empty() {
            let seeds = self
                .seeds
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let join = GossipMessage::Join {
                member: self.local.clone(),
            };
            for seed in seeds {
                if let Err(e) = self.send(&join, seed).await {
                    warn!("Failed to send join to {}: {}", seed, e);
                } else {
                    debug!("Sent join to {}", seed);
                }
            }
        }

        let target = targets.choose(&mut rand::thread_rng()).copied();
        if let Some(target) = target {
            let ping = GossipMessage::Ping {
                from: self.local.clone(),
            };
            if let Err(e) = self.send(&ping, target).await {
                warn!("Failed to send ping to {}: {}", target, e);
            }
        }
    }

    async fn receive_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                        Ok(msg) => {
                            if let Err(e) = self.handle_message(msg, src).await {
                                warn!("Error handling gossip from {}: {}", src, e);
                            }
                        }
                        Err(e) => warn!("Dropping undecodable gossip from {}: {}", src, e),
                    },
                    Err(e) => {
                        warn!("Gossip receive failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
    }

    pub(crate) async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Join { member } | GossipMessage::Ping { from: member } => {
                debug!("Gossip contact from {} ({})", member.id, src);
                self.observe(member, src);
                let ack = GossipMessage::Ack {
                    from: self.local.clone(),
                    members: self.alive_members(),
                };
                self.send(&ack, src).await?;
            }
            GossipMessage::Ack { from, members } => {
                self.observe(from, src);
                for member in members {
                    self.merge(member);
                }
            }
        }
        Ok(())
    }

    /// Direct contact: the member is alive right now. Wildcard addresses
    /// the member advertises are resolved to the IP it was heard from.
    fn observe(&self, mut member: Member, src: SocketAddr) {
        if member.id == self.local.id {
            return;
        }
        for addr in [&mut member.gossip_addr, &mut member.replication_addr] {
            if addr.ip().is_unspecified() {
                addr.set_ip(src.ip());
            }
        }
        member.state = MemberState::Alive;
        member.last_seen = Some(Instant::now());

        match self.members.insert(member.id.clone(), member.clone()) {
            None => info!(
                "Discovered member {} (replication {})",
                member.id, member.replication_addr
            ),
            Some(previous) if !previous.is_alive() => {
                info!("Member {} is alive again", member.id)
            }
            Some(_) => {}
        }
    }

    /// Hearsay from another member's ack: only learn unknown members.
    fn merge(&self, mut member: Member) {
        if member.id == self.local.id || self.members.contains_key(&member.id) {
            return;
        }
        if !member.is_alive() {
            return;
        }
        member.last_seen = Some(Instant::now());
        info!(
            "Learned of member {} (replication {}) via gossip",
            member.id, member.replication_addr
        );
        self.members.insert(member.id.clone(), member);
    }

    /// Age silent members: Alive -> Suspect -> Dead -> forgotten.
    pub(crate) fn detect_failures(&self, now: Instant) {
        for mut entry in self.members.iter_mut() {
            let member = entry.value_mut();
            let Some(last_seen) = member.last_seen else {
                continue;
            };
            let silence = now.saturating_duration_since(last_seen);

            match member.state {
                MemberState::Alive if silence > self.settings.suspect_timeout => {
                    warn!("Member {} suspected (silent for {:?})", member.id, silence);
                    member.state = MemberState::Suspect;
                }
                MemberState::Suspect if silence > self.settings.dead_timeout => {
                    warn!("Member {} declared dead (silent for {:?})", member.id, silence);
                    member.state = MemberState::Dead;
                }
                _ => {}
            }
        }

        let forget_after = self.settings.dead_timeout * PRUNE_FACTOR;
        self.members.retain(|id, member| {
            let expired = member.state == MemberState::Dead
                && member
                    .last_seen
                    .is_some_and(|seen| now.saturating_duration_since(seen) > forget_after);
            if expired {
                info!("Forgetting dead member {}", id);
            }
            !expired
        });
    }

    async fn send(&self, msg: &GossipMessage, to: SocketAddr) -> Result<()> {
        let encoded = bincode::serialize(msg)?;
        self.socket.send_to(&encoded, to).await?;
        Ok(())
    }
}

impl PeerSource for GossipMembership {
    fn list_peers(&self) -> Vec<PeerAddress> {
        let mut peers: Vec<PeerAddress> = self
            .members
            .iter()
            .filter(|e| e.value().is_alive() && e.value().replication_addr != self.local.replication_addr)
            .map(|e| e.value().replication_addr)
            .collect();
        peers.sort();
        peers.dedup();
        peers
    }
}
