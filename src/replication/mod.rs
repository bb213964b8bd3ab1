//! Replication engine
//!
//! Outbound: [`Broadcaster`] drains the replication queue and pushes every
//! locally committed write to the current peer set.
//! Inbound: [`ReplicationListener`] applies peer writes and serves snapshots.
//! Startup: [`BootstrapClient`] pulls a seed's snapshot before a node serves.

pub mod bootstrap;
pub mod broadcaster;
pub mod listener;

pub use bootstrap::BootstrapClient;
pub use broadcaster::{
    replication_queue, BroadcastReport, Broadcaster, ReplicationReceiver, ReplicationSender,
};
pub use listener::ReplicationListener;
