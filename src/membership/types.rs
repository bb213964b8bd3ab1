use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

/// Replication endpoint of another node.
pub type PeerAddress = SocketAddr;

/// Point-in-time view of the peers a write should be broadcast to.
///
/// Called fresh for every broadcast; callers never cache the result.
pub trait PeerSource: Send + Sync {
    fn list_peers(&self) -> Vec<PeerAddress>;
}

/// Fixed peer list, editable at runtime.
#[derive(Debug, Default)]
pub struct StaticPeers {
    peers: RwLock<Vec<PeerAddress>>,
}

impl StaticPeers {
    pub fn new(peers: Vec<PeerAddress>) -> Self {
        Self {
            peers: RwLock::new(peers),
        }
    }

    pub fn add(&self, peer: PeerAddress) {
        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }
}

impl PeerSource for StaticPeers {
    fn list_peers(&self) -> Vec<PeerAddress> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberState {
    Alive,
    Suspect,
    Dead,
}

/// A single member of the cluster as seen by this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub replication_addr: PeerAddress,
    pub state: MemberState,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl Member {
    pub fn is_alive(&self) -> bool {
        self.state == MemberState::Alive
    }
}

/// Gossip wire messages (bincode over UDP).
///
/// - `Join`: sent to a seed until the sender learns of any other member.
/// - `Ping`: periodic liveness probe to one random member.
/// - `Ack`: reply to `Join`/`Ping` carrying the sender's alive members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Join { member: Member },
    Ping { from: Member },
    Ack { from: Member, members: Vec<Member> },
}
