use error_stack::{Report, Result, ResultExt};

use crate::client::ClientsPool;
use crate::metrics::Metrics;
use crate::node::store::{Db, NodeStore};
use crate::node::Finger;
use crate::{Client, Node, NodeId, NodeInfo};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;

#[cfg(test)]
pub(crate) mod tests;

/// Consecutive stabilize ticks with an unreachable successor the node
/// tolerates before demoting the successor pointer to itself. The
/// degenerate-ring adoption rule then rebuilds the cycle from the
/// predecessor side.
const SUCCESSOR_MISS_LIMIT: u32 = 3;

/// Where a node is in its life.
///
/// `start` moves NEW to LISTENING, `create`/`join` move LISTENING to
/// IN-RING, `stop` ends in TERMINATED. Joining twice is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    New,
    Listening,
    InRing,
    Terminated,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::New => write!(f, "new"),
            Lifecycle::Listening => write!(f, "listening"),
            Lifecycle::InRing => write!(f, "in-ring"),
            Lifecycle::Terminated => write!(f, "terminated"),
        }
    }
}

/// Result of a lookup: the best known node for the key, and whether routing
/// had to fall back to the local successor because a forwarder died.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub node: Node,
    pub degraded: bool,
}

#[derive(Debug)]
pub struct NodeService<C: Client> {
    id: NodeId,
    addr: SocketAddr,
    store: NodeStore,

    clients: ClientsPool<C>,
    metrics: Metrics,
    lifecycle: Mutex<Lifecycle>,
    shutdown: watch::Sender<bool>,
}

impl<C: Client + Clone + Sync + Send + 'static> NodeService<C> {
    /// Create a new node service
    ///
    /// # Arguments
    ///
    /// * `socket_addr` - The address of the node; the id is its SHA-1.
    pub fn new(socket_addr: SocketAddr) -> Self {
        let id: NodeId = socket_addr.into();
        Self::with_id(id, socket_addr)
    }

    fn with_id(id: impl Into<NodeId>, addr: SocketAddr) -> Self {
        let id = id.into();
        let (shutdown, _) = watch::channel(false);
        Self {
            id,
            addr,
            store: NodeStore::new(Node::with_id(id, addr)),
            clients: ClientsPool::default(),
            metrics: Metrics::new(),
            lifecycle: Mutex::new(Lifecycle::New),
            shutdown,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn as_node(&self) -> Node {
        Node::with_id(self.id, self.addr)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn message_count(&self) -> u64 {
        self.metrics.message_count()
    }

    pub fn lookup_count(&self) -> u64 {
        self.metrics.lookup_count()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap()
    }

    fn set_lifecycle(&self, next: Lifecycle) {
        *self.lifecycle.lock().unwrap() = next;
    }

    fn expect_lifecycle(&self, expected: Lifecycle) -> Result<(), error::ServiceError> {
        let current = self.lifecycle();
        if current != expected {
            return Err(Report::new(error::ServiceError::InvalidLifecycle {
                expected,
                current,
            }));
        }
        Ok(())
    }

    /// Mark the node as listening. The caller is responsible for having
    /// bound the listener; a bind failure is fatal and never reaches here.
    pub fn start(&self) -> Result<(), error::ServiceError> {
        self.expect_lifecycle(Lifecycle::New)?;
        self.set_lifecycle(Lifecycle::Listening);
        Ok(())
    }

    /// Create a fresh single-node ring.
    ///
    /// The store already points every finger, successor included, at the
    /// node itself, so entering the ring is a pure state transition.
    pub fn create(&self) -> Result<(), error::ServiceError> {
        self.expect_lifecycle(Lifecycle::Listening)?;
        self.set_lifecycle(Lifecycle::InRing);
        log::info!("Created a new ring at {}", self.addr);
        Ok(())
    }

    /// Join the chord ring.
    ///
    /// Asks the bootstrap node for the successor of our own id and adopts
    /// it. The predecessor stays unset; stabilize introduces us to the
    /// neighbours from here on.
    ///
    /// # Arguments
    ///
    /// * `node` - An existing node in the ring.
    pub async fn join(&self, node: Node) -> Result<(), error::ServiceError> {
        self.expect_lifecycle(Lifecycle::Listening)?;

        let client: Arc<C> = self.client(&node).await;
        let successor = client
            .find_successor(self.id)
            .await
            .change_context(error::ServiceError::JoinFailed)?;

        if successor.id() == self.id && successor.addr() != self.addr {
            // Another node already sits on our position; refusing beats
            // fighting over ownership of the same arc.
            return Err(Report::new(error::ServiceError::IdCollision));
        }

        self.store().set_successor(successor);
        self.set_lifecycle(Lifecycle::InRing);
        log::info!("Joined the ring via {}", node.addr());
        Ok(())
    }

    /// Halt the node: maintenance tasks and the RPC server exit at their
    /// next wake. There is no leave protocol, the survivors clean up.
    pub fn stop(&self) {
        self.set_lifecycle(Lifecycle::Terminated);
        let _ = self.shutdown.send(true);
        log::info!("Node at {} stopped", self.addr);
    }

    /// Receiver that flips to `true` once `stop` has been called.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Find the successor of the given id.
    ///
    /// If the id falls between this node and its successor, the successor
    /// answers. Otherwise the lookup is forwarded to the closest preceding
    /// finger; when that forwarder cannot be reached the local successor is
    /// returned with the degraded flag set, so the lookup always terminates.
    ///
    /// # Arguments
    ///
    /// * `id` - The id to find the successor for
    pub async fn find_successor(&self, id: NodeId) -> Result<Lookup, error::ServiceError> {
        let started = Instant::now();

        let successor = self.store().successor();
        if NodeId::is_between_on_ring(id, self.id, successor.id()) {
            self.metrics.record_lookup(started.elapsed());
            return Ok(Lookup {
                node: successor,
                degraded: false,
            });
        }

        let next = self.closest_preceding_node(id);
        if next.id() == self.id {
            // No better forwarder known.
            self.metrics.record_lookup(started.elapsed());
            return Ok(Lookup {
                node: self.as_node(),
                degraded: false,
            });
        }

        let client: Arc<C> = self.client(&next).await;
        let lookup = match client.find_successor(id).await {
            Ok(node) => Lookup {
                node,
                degraded: false,
            },
            Err(report) => {
                self.clients.invalidate(&next.id());
                log::debug!(
                    "Forwarder {} failed for id {}, degrading to local successor: {:?}",
                    next.addr(),
                    id,
                    report
                );
                Lookup {
                    node: self.store().successor(),
                    degraded: true,
                }
            }
        };
        self.metrics.record_lookup(started.elapsed());
        Ok(lookup)
    }

    /// Get closest preceding node
    ///
    /// Walks the finger table from the top slot down and returns the first
    /// finger lying strictly between this node and the id; the node itself
    /// when none does.
    ///
    /// # Arguments
    ///
    /// * `id` - The id to find the closest preceding node for
    pub fn closest_preceding_node(&self, id: NodeId) -> Node {
        self.store()
            .closest_preceding_node(self.id, id)
            .unwrap_or_else(|| self.as_node())
    }

    /// Notify the node about a potential new predecessor.
    ///
    /// The caller is adopted when no predecessor is known, or when it lies
    /// strictly between the current predecessor and this node. A
    /// predecessor pointing home is the single-node degenerate state; any
    /// other caller replaces it.
    ///
    /// # Arguments
    ///
    /// * `caller` - The node which might be the new predecessor
    pub fn notify(&self, caller: Node) {
        let self_id = self.id;
        self.store().update_predecessor_with(|current| {
            let accept = match current {
                None => true,
                Some(node) if node.id() == caller.id() => false,
                Some(node) if node.id() == self_id => caller.id() != self_id,
                Some(node) => {
                    NodeId::is_between_on_ring_exclusive(caller.id(), node.id(), self_id)
                }
            };
            accept.then(|| caller.clone())
        });
    }

    /// Stabilize the node
    ///
    /// Asks the successor for its predecessor and adopts that node when it
    /// sits between the two of us, then tells the successor about us. An
    /// unreachable successor makes the tick a no-op; after
    /// `SUCCESSOR_MISS_LIMIT` consecutive misses the pointer is demoted to
    /// the node itself and the ring re-forms from the predecessor side.
    ///
    /// > **Note**
    /// >
    /// > This method should be called periodically.
    pub async fn stabilize(&self) -> Result<(), error::ServiceError> {
        let successor = self.store().successor();

        let candidate = if successor.id() == self.id {
            // Ring of one: our own state is the authority, no call needed.
            self.store().predecessor()
        } else {
            let client: Arc<C> = self.client(&successor).await;
            match client.get_info().await {
                Ok(info) => {
                    self.store().clear_successor_misses();
                    info.predecessor
                }
                Err(report) => {
                    self.clients.invalidate(&successor.id());
                    let misses = self.store().record_successor_miss();
                    if misses >= SUCCESSOR_MISS_LIMIT {
                        log::info!(
                            "Successor {} unreachable {} times, falling back to a ring of one",
                            successor.addr(),
                            misses
                        );
                        self.store().set_successor(self.as_node());
                    } else {
                        log::debug!(
                            "Successor {} unreachable, skipping stabilize tick: {:?}",
                            successor.addr(),
                            report
                        );
                    }
                    return Ok(());
                }
            }
        };

        if let Some(x) = candidate {
            // The successor may have changed while get_info was in flight;
            // only adopt against the pointer we actually observed.
            let current = self.store().successor();
            if current.id() == successor.id() && x.id() != self.id {
                let adopt = current.id() == self.id
                    || NodeId::is_between_on_ring_exclusive(x.id(), self.id, current.id());
                if adopt {
                    log::debug!("Adopting {} as the new successor", x.addr());
                    self.store().set_successor(x);
                }
            }
        }

        let successor = self.store().successor();
        if successor.id() == self.id {
            self.notify(self.as_node());
            return Ok(());
        }

        let client: Arc<C> = self.client(&successor).await;
        if let Err(report) = client.notify(self.as_node()).await {
            self.clients.invalidate(&successor.id());
            return Err(report.change_context(error::ServiceError::ClientDisconnected));
        }
        Ok(())
    }

    /// Check predecessor
    ///
    /// Pings the predecessor and forgets it when it does not answer. A
    /// later notify from a live candidate repopulates the pointer.
    ///
    /// > **Note**
    /// >
    /// > This method should be called periodically.
    pub async fn check_predecessor(&self) -> Result<(), error::ServiceError> {
        let Some(predecessor) = self.store().predecessor() else {
            return Ok(());
        };
        if predecessor.id() == self.id {
            return Ok(());
        }

        let client: Arc<C> = self.client(&predecessor).await;
        match client.ping().await {
            Ok(_) => Ok(()),
            Err(report) => {
                if report.current_context().is_disconnect() {
                    log::info!(
                        "Predecessor {:?} is down, removing. Error: {:?}",
                        predecessor.addr(),
                        report
                    );
                    self.clients.invalidate(&predecessor.id());
                    self.store().unset_predecessor_if(predecessor.id());
                }
                Ok(())
            }
        }
    }

    /// Fix fingers
    ///
    /// Refreshes ONE finger per call, round-robin over the table, by
    /// looking up the successor of the slot's start. A failed or degraded
    /// lookup updates nothing; the cursor advances regardless so a single
    /// dead peer cannot stall the rotation.
    ///
    /// > **Note**
    /// >
    /// > This method should be called periodically.
    pub async fn fix_fingers(&self) {
        let index = self.store().advance_next_finger();
        let target = Finger::finger_start(self.id, index);

        match self.find_successor(target).await {
            Ok(lookup) if !lookup.degraded => {
                self.store().update_finger(index - 1, lookup.node);
            }
            Ok(lookup) => {
                log::debug!(
                    "Skipping refresh of finger {}, lookup degraded to {}",
                    index,
                    lookup.node.addr()
                );
            }
            Err(report) => {
                log::error!("Failed to fix finger {}: {:?}", index, report);
            }
        }
    }

    /// Get finger table
    ///
    /// This method is used to get the finger table of the node.
    pub fn finger_table(&self) -> Vec<Finger> {
        self.store().finger_table()
    }

    pub fn successor(&self) -> Node {
        self.store().successor()
    }

    pub fn predecessor(&self) -> Option<Node> {
        self.store().predecessor()
    }

    /// Coherent snapshot of the node's ring pointers, served to `get_info`.
    /// Fingers are copied out, never aliased.
    pub fn info(&self) -> NodeInfo {
        let (predecessor, successor, fingers) = self.store().snapshot();
        NodeInfo {
            node: self.as_node(),
            predecessor,
            successor: Some(successor),
            fingers,
        }
    }

    pub(crate) fn store(&self) -> Db {
        self.store.db()
    }

    async fn client(&self, node: &Node) -> Arc<C> {
        self.clients.get_or_init(node).await
    }
}

pub mod error {
    use error_stack::Context;

    use super::Lifecycle;
    use std::fmt::Display;

    #[derive(Debug)]
    pub enum ServiceError {
        Unexpected(String),
        ClientDisconnected,
        JoinFailed,
        IdCollision,
        InvalidLifecycle {
            expected: Lifecycle,
            current: Lifecycle,
        },
    }

    impl Context for ServiceError {}

    impl Display for ServiceError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Unexpected(message) => write!(f, "{}", message),
                Self::ClientDisconnected => write!(f, "Client disconnected"),
                Self::JoinFailed => write!(f, "Could not join the ring"),
                Self::IdCollision => {
                    write!(f, "A node with the same id already is in the ring")
                }
                Self::InvalidLifecycle { expected, current } => {
                    write!(f, "Node is {} but the operation requires {}", current, expected)
                }
            }
        }
    }
}
