mod pool;

use crate::{Node, NodeId, NodeInfo};
use async_trait::async_trait;
use error_stack::{Context, Result};
use mockall::automock;
pub use pool::ClientsPool;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::time::Duration;

/// Deadline applied to every remote call.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote invocation of the five ring operations on a peer.
///
/// Implementations are cached per peer in a [`ClientsPool`]; a client whose
/// call fails is evicted so the next use reconnects.
#[automock]
#[async_trait]
pub trait Client {
    /// Init the client
    ///
    /// # Arguments
    ///
    /// * `addr` - The node address to connect to
    async fn init(addr: SocketAddr) -> Self;

    /// Find a successor of a given id.
    ///
    /// # Arguments
    ///
    /// * `id` - The id to find the successor for
    async fn find_successor(&self, id: NodeId) -> Result<Node, ClientError>;

    /// Get the highest finger of the peer that strictly precedes the id.
    async fn closest_preceding_finger(&self, id: NodeId) -> Result<Node, ClientError>;

    /// Get the peer's ring pointers: itself, predecessor, successor, fingers.
    async fn get_info(&self) -> Result<NodeInfo, ClientError>;

    /// Notify the node about a new predecessor
    ///
    /// # Arguments
    ///
    /// * `predecessor` - The new predecessor candidate
    async fn notify(&self, predecessor: Node) -> Result<(), ClientError>;

    /// Ping the node
    async fn ping(&self) -> Result<(), ClientError>;
}

/// The three remote failure kinds, plus request validation.
///
/// Callers distinguish a peer that could not be reached or answered too
/// late (both mean "possibly dead") from a peer that answered garbage.
#[derive(Debug, Clone)]
pub enum ClientError {
    Unreachable(SocketAddr),
    Timeout(SocketAddr),
    Remote(String),
    InvalidRequest(String),
}

impl ClientError {
    /// True when the peer did not answer at all.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ClientError::Unreachable(_) | ClientError::Timeout(_))
    }
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Unreachable(addr) => write!(f, "Peer {} is unreachable", addr),
            ClientError::Timeout(addr) => write!(f, "Call to peer {} timed out", addr),
            ClientError::Remote(message) => write!(f, "Remote error: {}", message),
            ClientError::InvalidRequest(message) => write!(f, "Invalid request: {}", message),
        }
    }
}

impl Context for ClientError {}

#[cfg(test)]
impl Clone for MockClient {
    fn clone(&self) -> Self {
        Self::default()
    }
}
