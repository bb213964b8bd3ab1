//! Node lifecycle
//!
//! `Init -> Recovering -> [Bootstrapping] -> Serving -> ShuttingDown -> Stopped`.
//! Shutdown may begin from any state before `Stopped`.

use crate::common::{Error, Result};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    Init,
    Recovering,
    Bootstrapping,
    Serving,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Init => write!(f, "init"),
            NodeState::Recovering => write!(f, "recovering"),
            NodeState::Bootstrapping => write!(f, "bootstrapping"),
            NodeState::Serving => write!(f, "serving"),
            NodeState::ShuttingDown => write!(f, "shutting-down"),
            NodeState::Stopped => write!(f, "stopped"),
        }
    }
}

impl NodeState {
    /// Only a serving node accepts client connections.
    pub fn accepts_clients(self) -> bool {
        self == NodeState::Serving
    }

    /// Only a node with a complete dataset may hand out snapshots.
    pub fn serves_bootstrap(self) -> bool {
        self == NodeState::Serving
    }

    pub fn can_advance_to(self, next: NodeState) -> bool {
        use NodeState::*;
        match (self, next) {
            (Init, Recovering) => true,
            (Recovering, Bootstrapping) | (Recovering, Serving) => true,
            (Bootstrapping, Serving) => true,
            (ShuttingDown, Stopped) => true,
            (Stopped, _) | (ShuttingDown, ShuttingDown) => false,
            (_, ShuttingDown) => true,
            _ => false,
        }
    }
}

/// Shared, observable lifecycle state.
pub struct Lifecycle {
    tx: watch::Sender<NodeState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(NodeState::Init);
        Self { tx }
    }

    pub fn current(&self) -> NodeState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<NodeState> {
        self.tx.subscribe()
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn advance(&self, next: NodeState) -> Result<()> {
        let mut result = Ok(());
        self.tx.send_if_modified(|state| {
            if state.can_advance_to(next) {
                tracing::info!("Node state {} -> {}", state, next);
                *state = next;
                true
            } else {
                result = Err(Error::InvalidState(format!("{} -> {}", state, next)));
                false
            }
        });
        result
    }
}
