//! Cluster membership and transport contract.
//!
//! The registry does not run its own gossip or peer connections; it consumes
//! a membership view and a synchronous request channel to each peer through
//! the [`Cluster`] trait. Gated operations check [`Cluster::is_ready`] and
//! fail with a not-ready error while the gate is closed; the single-node
//! publish fast-path deliberately skips that check so a partitioned node
//! keeps serving its own subscribers.

mod protocol;

pub use protocol::{PeerRequest, PeerResponse, PEER_PROTOCOL_VERSION};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

/// Error type for peer operations
#[derive(Debug)]
pub enum RemoteError {
    /// Connection to the peer failed or was lost
    ConnectionLost(String),
    /// No such node in the current membership view
    UnknownNode(String),
    /// Operation timed out
    Timeout,
    /// Other error
    Other(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            RemoteError::UnknownNode(node) => write!(f, "Unknown node: {}", node),
            RemoteError::Timeout => write!(f, "Operation timed out"),
            RemoteError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Membership view plus request transport for the registry.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Name of the local node.
    fn node_name(&self) -> &str;

    /// All member nodes, the local one included.
    fn nodes(&self) -> Vec<String>;

    /// Whether the cluster is ready to serve gated operations.
    fn is_ready(&self) -> bool;

    /// Synchronously invoke a request on a peer node.
    async fn call(&self, node: &str, request: PeerRequest) -> Result<PeerResponse, RemoteError>;
}

/// Single-node membership: the cluster is just us.
///
/// Readiness is settable so tests and maintenance tooling can simulate a
/// closed gate (a partitioned or still-joining node).
pub struct StandaloneCluster {
    node: String,
    ready: AtomicBool,
}

impl StandaloneCluster {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            ready: AtomicBool::new(true),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

#[async_trait]
impl Cluster for StandaloneCluster {
    fn node_name(&self) -> &str {
        &self.node
    }

    fn nodes(&self) -> Vec<String> {
        vec![self.node.clone()]
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn call(&self, node: &str, _request: PeerRequest) -> Result<PeerResponse, RemoteError> {
        Err(RemoteError::UnknownNode(node.to_string()))
    }
}
