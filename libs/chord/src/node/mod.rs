pub(crate) mod store;

use crate::{Node, NodeId, ID_BITS};

/// One routing shortcut on the ring.
///
/// Slot `i` (one-indexed) covers the arc starting at
/// `(n + 2^(i-1)) mod 2^160` and points at the first node at or after that
/// position. The first slot is the successor.
#[derive(Debug, Clone, PartialEq)]
pub struct Finger {
    pub(crate) start: NodeId,
    pub(crate) node: Node,
}

impl Finger {
    pub const FINGER_TABLE_SIZE: usize = ID_BITS;

    pub(crate) fn new(start: NodeId, node: Node) -> Self {
        Self { start, node }
    }

    /// `start(i) = (id + 2^(i-1)) mod 2^160` for the one-indexed slot `i`.
    pub fn finger_start(id: NodeId, index: usize) -> NodeId {
        debug_assert!((1..=Self::FINGER_TABLE_SIZE).contains(&index));
        id.wrapping_add_pow2(index - 1)
    }

    /// Fresh table for a node that knows nobody: every entry points home.
    pub(crate) fn init_finger_table(node: Node) -> Vec<Finger> {
        (1..=Self::FINGER_TABLE_SIZE)
            .map(|i| Finger::new(Self::finger_start(node.id(), i), node.clone()))
            .collect()
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn node(&self) -> &Node {
        &self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ID_BYTES;
    use std::net::SocketAddr;

    #[test]
    fn test_finger_start() {
        let id = NodeId::from(100u64);
        assert_eq!(Finger::finger_start(id, 1), NodeId::from(101u64));
        assert_eq!(Finger::finger_start(id, 2), NodeId::from(102u64));
        assert_eq!(Finger::finger_start(id, 3), NodeId::from(104u64));
        assert_eq!(Finger::finger_start(id, 4), NodeId::from(108u64));
        assert_eq!(Finger::finger_start(id, 8), NodeId::from(228u64));
    }

    #[test]
    fn test_finger_start_wraps() {
        let max = NodeId::from_bytes([0xff; ID_BYTES]);
        assert_eq!(Finger::finger_start(max, 1), NodeId::ZERO);
        assert_eq!(Finger::finger_start(max, 2), NodeId::from(1u64));
    }

    #[test]
    fn test_init_finger_table() {
        let node = Node::with_id(8u64, SocketAddr::from(([127, 0, 0, 1], 42008)));
        let table = Finger::init_finger_table(node.clone());

        assert_eq!(table.len(), Finger::FINGER_TABLE_SIZE);
        assert_eq!(table[0].start(), NodeId::from(9u64));
        assert_eq!(table[1].start(), NodeId::from(10u64));
        assert_eq!(table[7].start(), NodeId::from(136u64));
        assert!(table.iter().all(|finger| finger.node() == &node));
    }
}
