//! Node: lifecycle, client endpoint and wiring of storage, replication
//! and membership.

pub mod handler;
pub mod server;
pub mod state;

pub use handler::ClientRequestHandler;
pub use server::{Node, NodeHandle};
pub use state::{Lifecycle, NodeState};
