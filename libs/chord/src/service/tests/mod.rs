use crate::client::{ClientsPool, MockClient};
use crate::{Node, NodeId, NodeService};
use std::net::SocketAddr;

mod notify;

use crate::metrics::Metrics;
use crate::node::store::NodeStore;
use crate::node::Finger;
use crate::service::Lifecycle;
use lazy_static::lazy_static;
use mockall::predicate;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

lazy_static! {
    pub(crate) static ref MTX: Mutex<()> = Mutex::new(());
}

// When a test panics, it will poison the Mutex. Since we don't actually
// care about the state of the data we ignore that it is poisoned and grab
// the lock regardless.  If you just do `let _m = &MTX.lock().unwrap()`, one
// test panicking will cause all other tests that try and acquire a lock on
// that Mutex to also panic.
pub(crate) fn get_lock(m: &'static Mutex<()>) -> MutexGuard<'static, ()> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn node(id: u64) -> Node {
    let addr = SocketAddr::from(([127, 0, 0, 1], 42000 + id as u16));
    Node::with_id(id, addr)
}

impl Default for NodeService<MockClient> {
    fn default() -> Self {
        Self::test_service(8)
    }
}

impl NodeService<MockClient> {
    fn test_service(id: u64) -> Self {
        let node = node(id);
        let (shutdown, _) = watch::channel(false);
        Self {
            id: node.id(),
            addr: node.addr(),
            store: NodeStore::new(node),
            clients: ClientsPool::default(),
            metrics: Metrics::new(),
            lifecycle: Mutex::new(Lifecycle::Listening),
            shutdown,
        }
    }

    fn find_closest_successor(id: NodeId, nodes: &[Node]) -> Node {
        let mut nodes = nodes.to_vec();
        nodes.sort_by_key(|node| node.id());

        nodes
            .iter()
            .find(|node| node.id() >= id)
            .unwrap_or(&nodes[0])
            .clone()
    }

    /// Fill the finger table as a converged ring of the given nodes would
    /// have it: every slot points at the true successor of its start.
    pub(crate) fn with_fingers(&mut self, nodes_ids: Vec<u64>) {
        let nodes: Vec<Node> = nodes_ids.into_iter().map(node).collect();

        for i in 1..=Finger::FINGER_TABLE_SIZE {
            let start = Finger::finger_start(self.id, i);
            let closest = Self::find_closest_successor(start, &nodes);
            self.store.db().update_finger(i - 1, closest);
        }
    }
}

impl MockClient {
    /// Mock find_successor method.
    ///
    /// # Arguments
    ///
    /// * `id` - The id for which to find the successor.
    /// * `return_node` - The successor to return.
    fn mock_find_successor(&mut self, id: NodeId, return_node: u64) {
        self.expect_find_successor()
            .with(predicate::eq(id))
            .times(1)
            .returning(move |_| Ok(node(return_node)));
    }
}

mod tests {
    use super::*;

    #[test]
    fn test_finger_table() {
        let mut service = NodeService::default();
        let nodes = vec![1, 16, 32, 64];
        service.with_fingers(nodes);

        let table = service.finger_table();
        assert_eq!(table[0].start(), NodeId::from(9u64));
        assert_eq!(table[0].node().id(), NodeId::from(16u64));
        assert_eq!(table[1].start(), NodeId::from(10u64));
        assert_eq!(table[1].node().id(), NodeId::from(16u64));
        assert_eq!(table[3].start(), NodeId::from(16u64));
        assert_eq!(table[3].node().id(), NodeId::from(16u64));
        assert_eq!(table[4].start(), NodeId::from(24u64));
        assert_eq!(table[4].node().id(), NodeId::from(32u64));
        assert_eq!(table[5].node().id(), NodeId::from(64u64));

        // Starts beyond the highest node wrap to the smallest one.
        assert_eq!(table[6].start(), NodeId::from(72u64));
        assert_eq!(table[6].node().id(), NodeId::from(1u64));
        assert_eq!(table[159].node().id(), NodeId::from(1u64));

        // The first slot is the successor.
        assert_eq!(service.successor().id(), NodeId::from(16u64));
    }

    #[test]
    fn test_closest_successor() {
        let nodes = vec![node(1), node(16), node(32), node(64)];

        let closest = NodeService::find_closest_successor(NodeId::from(1u64), &nodes);
        assert_eq!(NodeId::from(1u64), closest.id());

        let closest = NodeService::find_closest_successor(NodeId::from(2u64), &nodes);
        assert_eq!(NodeId::from(16u64), closest.id());

        let closest = NodeService::find_closest_successor(NodeId::from(25u64), &nodes);
        assert_eq!(NodeId::from(32u64), closest.id());

        let closest = NodeService::find_closest_successor(NodeId::from(33u64), &nodes);
        assert_eq!(NodeId::from(64u64), closest.id());

        let closest = NodeService::find_closest_successor(NodeId::from(64u64), &nodes);
        assert_eq!(NodeId::from(64u64), closest.id());

        let closest = NodeService::find_closest_successor(NodeId::from(65u64), &nodes);
        assert_eq!(NodeId::from(1u64), closest.id());
    }

    #[test]
    fn test_info_snapshot() {
        let service = NodeService::default();
        service.store().set_successor(node(16));
        service.store().set_predecessor(node(4));

        let info = service.info();
        assert_eq!(info.node, node(8));
        assert_eq!(info.predecessor, Some(node(4)));
        assert_eq!(info.successor, Some(node(16)));
        assert_eq!(info.fingers.len(), Finger::FINGER_TABLE_SIZE);
        assert_eq!(info.fingers[0], node(16));
    }
}
