//! Membership & discovery
//!
//! The replication engine only needs one capability from membership: a
//! fresh list of peer replication addresses per broadcast ([`PeerSource`]).
//! [`GossipMembership`] provides it over a small UDP gossip protocol;
//! [`StaticPeers`] is a fixed list for tests and single-node setups.

pub mod service;
pub mod types;

pub use service::{GossipMembership, GossipSettings};
pub use types::{GossipMessage, Member, MemberState, NodeId, PeerAddress, PeerSource, StaticPeers};
