use std::sync::{Arc, Mutex};

use crate::node::Finger;
use crate::{Node, NodeId};

/// Shared ring state of a node.
///
/// Successor, predecessor and the finger table live behind a single mutex;
/// the successor IS the first finger entry, so the two can never disagree.
#[derive(Debug)]
pub(crate) struct NodeStore {
    db: Db,
}

#[derive(Debug, Clone)]
pub(crate) struct Db {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    predecessor: Option<Node>,
    finger_table: Vec<Finger>,
    /// One-indexed slot refreshed by the previous fix-fingers tick.
    next_finger: usize,
    /// Consecutive stabilize ticks on which the successor was unreachable.
    successor_misses: u32,
}

impl NodeStore {
    /// Create a store for a node that is alone on the ring: every pointer,
    /// successor included, refers to the node itself.
    pub(crate) fn new(node: Node) -> Self {
        Self { db: Db::new(node) }
    }

    /// Get the shared database. Internally, this is an
    /// `Arc`, so a clone only increments the ref count.
    pub(crate) fn db(&self) -> Db {
        self.db.clone()
    }
}

impl Db {
    pub(crate) fn new(node: Node) -> Db {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                predecessor: None,
                finger_table: Finger::init_finger_table(node),
                next_finger: 0,
                successor_misses: 0,
            }),
        });

        Db { shared }
    }

    pub(crate) fn set_predecessor(&self, predecessor: Node) {
        let mut state = self.shared_state();
        state.predecessor = Some(predecessor);
    }

    pub(crate) fn unset_predecessor(&self) {
        let mut state = self.shared_state();
        state.predecessor = None;
    }

    /// Drop the predecessor only if it still is the node we probed.
    /// A concurrent notify may have installed a fresh one in the meantime.
    pub(crate) fn unset_predecessor_if(&self, id: NodeId) {
        let mut state = self.shared_state();
        if state.predecessor.as_ref().map(|node| node.id()) == Some(id) {
            state.predecessor = None;
        }
    }

    /// Run an acceptance decision and the resulting predecessor write under
    /// one lock, so concurrent notifies cannot interleave between the two.
    pub(crate) fn update_predecessor_with(
        &self,
        decide: impl FnOnce(&Option<Node>) -> Option<Node>,
    ) {
        let mut state = self.shared_state();
        if let Some(next) = decide(&state.predecessor) {
            state.predecessor = Some(next);
        }
    }

    pub(crate) fn predecessor(&self) -> Option<Node> {
        let state = self.shared_state();
        state.predecessor.clone()
    }

    /// Set the successor of the node. The write lands in the first finger
    /// slot and resets the unreachability count.
    pub(crate) fn set_successor(&self, successor: Node) {
        let mut state = self.shared_state();
        state.finger_table[0].node = successor;
        state.successor_misses = 0;
    }

    pub(crate) fn successor(&self) -> Node {
        let state = self.shared_state();
        state.finger_table[0].node.clone()
    }

    /// Get the closest preceding node for a key: the highest finger whose
    /// id lies strictly between the node and the key.
    ///
    /// # Arguments
    ///
    /// * `node_id` - The id of the current node
    /// * `id` - The id of the key we are looking for
    pub(crate) fn closest_preceding_node(&self, node_id: NodeId, id: NodeId) -> Option<Node> {
        let fingers = {
            let state = self.shared_state();
            state.finger_table.clone()
        };

        for finger in fingers.iter().rev() {
            if NodeId::is_between_on_ring_exclusive(finger.node.id(), node_id, id) {
                return Some(finger.node.clone());
            }
        }

        None
    }

    pub(crate) fn update_finger(&self, finger_index: usize, node: Node) {
        let mut state = self.shared_state();
        state.finger_table[finger_index].node = node;
        if finger_index == 0 {
            // Slot one is the successor; a refresh counts as a successful write.
            state.successor_misses = 0;
        }
    }

    pub(crate) fn finger_table(&self) -> Vec<Finger> {
        let state = self.shared_state();
        state.finger_table.clone()
    }

    /// Advance the fix-fingers cursor and return the one-indexed slot to
    /// refresh, wrapping from the last slot back to the first.
    pub(crate) fn advance_next_finger(&self) -> usize {
        let mut state = self.shared_state();
        state.next_finger = state.next_finger % Finger::FINGER_TABLE_SIZE + 1;
        state.next_finger
    }

    /// Record one stabilize tick with an unreachable successor and return
    /// the consecutive miss count.
    pub(crate) fn record_successor_miss(&self) -> u32 {
        let mut state = self.shared_state();
        state.successor_misses += 1;
        state.successor_misses
    }

    pub(crate) fn clear_successor_misses(&self) {
        let mut state = self.shared_state();
        state.successor_misses = 0;
    }

    /// Coherent copy of all ring pointers, taken under a single lock.
    pub(crate) fn snapshot(&self) -> (Option<Node>, Node, Vec<Node>) {
        let state = self.shared_state();
        let predecessor = state.predecessor.clone();
        let successor = state.finger_table[0].node.clone();
        let fingers = state
            .finger_table
            .iter()
            .map(|finger| finger.node.clone())
            .collect();
        (predecessor, successor, fingers)
    }

    fn shared_state(&self) -> std::sync::MutexGuard<State> {
        let lock = self.shared.state.lock();
        if let Ok(state) = lock {
            return state;
        } else {
            log::error!("Could not lock state, error: {}", lock.unwrap_err());
            panic!("Could not lock state");
        }
    }
}
