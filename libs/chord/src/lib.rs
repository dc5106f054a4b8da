pub mod client;
pub mod metrics;
mod node;
pub mod server;
mod service;

use sha1::{Digest, Sha1};
use std::fmt;
use std::net::SocketAddr;

pub use client::Client;
pub use node::Finger;
pub use service::{Lifecycle, Lookup, NodeService};

pub use service::error;

/// Width of the identifier space in bits (SHA-1 output width).
pub const ID_BITS: usize = 160;

/// Width of the identifier space in bytes.
pub const ID_BYTES: usize = ID_BITS / 8;

/// A position on the chord ring: an unsigned 160-bit integer, stored
/// big-endian.
///
/// Identifiers are derived from a node's `host:port` string by SHA-1 and
/// wrap modulo `2^160`. Ordering is plain big-endian byte order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; ID_BYTES]);

impl NodeId {
    pub const ZERO: Self = Self([0u8; ID_BYTES]);

    pub fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// Derive an identifier by SHA-1 hashing arbitrary bytes.
    pub fn from_sha1(data: &[u8]) -> Self {
        let hash = Sha1::digest(data);
        let mut bytes = [0u8; ID_BYTES];
        bytes.copy_from_slice(&hash);
        Self(bytes)
    }

    /// Full 40-character lowercase hex rendering, as carried on the wire.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(ID_BYTES * 2);
        for byte in &self.0 {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }

    /// Parse a hex identifier. Shorter strings are accepted and left-padded
    /// with zeros, so `"ff"` and `"00…00ff"` denote the same position.
    pub fn from_hex(hex: &str) -> Result<Self, ParseIdError> {
        if hex.is_empty() || hex.len() > ID_BYTES * 2 {
            return Err(ParseIdError::new(hex));
        }

        let mut bytes = [0u8; ID_BYTES];
        let mut nibbles = hex.chars().rev();
        for i in (0..ID_BYTES).rev() {
            let low = match nibbles.next() {
                Some(c) => c.to_digit(16).ok_or_else(|| ParseIdError::new(hex))? as u8,
                None => break,
            };
            let high = match nibbles.next() {
                Some(c) => c.to_digit(16).ok_or_else(|| ParseIdError::new(hex))? as u8,
                None => {
                    bytes[i] = low;
                    break;
                }
            };
            bytes[i] = (high << 4) | low;
        }
        Ok(Self(bytes))
    }

    /// Addition modulo `2^160`.
    pub fn wrapping_add(&self, other: &NodeId) -> NodeId {
        let mut out = [0u8; ID_BYTES];
        let mut carry = 0u16;
        for i in (0..ID_BYTES).rev() {
            let sum = self.0[i] as u16 + other.0[i] as u16 + carry;
            out[i] = sum as u8;
            carry = sum >> 8;
        }
        // A carry out of the top byte falls off the ring.
        NodeId(out)
    }

    /// `self + 2^exp` modulo `2^160`, for `exp < 160`.
    pub fn wrapping_add_pow2(&self, exp: usize) -> NodeId {
        debug_assert!(exp < ID_BITS);
        let mut addend = [0u8; ID_BYTES];
        addend[ID_BYTES - 1 - exp / 8] = 1 << (exp % 8);
        self.wrapping_add(&NodeId(addend))
    }

    /// Returns true if `id` lies in the arc `(start, end]` on the ring.
    ///
    /// When `start == end` the arc covers the whole ring except `start`
    /// itself; when `start > end` the arc wraps through zero.
    ///
    /// # Examples
    ///
    /// Check if 10 is between 5 and 15
    ///
    /// ```
    /// use rotunda_chord::NodeId;
    ///
    /// let id = NodeId::from(10u64);
    /// let start = NodeId::from(5u64);
    /// let end = NodeId::from(15u64);
    ///
    /// assert_eq!(NodeId::is_between_on_ring(id, start, end), true);
    /// ```
    ///
    /// Check if 20 is between 15 and 5
    /// ```
    /// use rotunda_chord::NodeId;
    ///
    /// let id = NodeId::from(20u64);
    /// let start = NodeId::from(15u64);
    /// let end = NodeId::from(5u64);
    ///
    /// assert_eq!(NodeId::is_between_on_ring(id, start, end), true);
    /// ```
    pub fn is_between_on_ring(id: NodeId, start: NodeId, end: NodeId) -> bool {
        if start == end {
            id != start
        } else if start < end {
            start < id && id <= end
        } else {
            id > start || id <= end
        }
    }

    /// Returns true if `id` lies in the open arc `(start, end)`.
    ///
    /// When `start == end` the arc is empty.
    pub fn is_between_on_ring_exclusive(id: NodeId, start: NodeId, end: NodeId) -> bool {
        if start == end {
            false
        } else if start < end {
            start < id && id < end
        } else {
            id > start || id < end
        }
    }

    /// Returns true if `id` lies in the arc `[start, end)`.
    ///
    /// When `start == end` the arc contains only `start`.
    pub fn is_between_on_ring_start_inclusive(id: NodeId, start: NodeId, end: NodeId) -> bool {
        id == start || NodeId::is_between_on_ring_exclusive(id, start, end)
    }
}

impl From<SocketAddr> for NodeId {
    fn from(addr: SocketAddr) -> Self {
        Self::from_sha1(addr.to_string().as_bytes())
    }
}

impl From<String> for NodeId {
    fn from(key: String) -> Self {
        Self::from_sha1(key.as_bytes())
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; ID_BYTES];
        bytes[ID_BYTES - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First four bytes are plenty for log lines.
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "…")
    }
}

/// Error returned when a wire identifier is not valid hex.
#[derive(Debug)]
pub struct ParseIdError {
    input: String,
}

impl ParseIdError {
    fn new(input: &str) -> Self {
        ParseIdError {
            input: input.to_string(),
        }
    }
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid identifier: {:?}", self.input)
    }
}

impl std::error::Error for ParseIdError {}

/// A reference to a node in the chord ring.
///
/// Pure value type: the address is the identity, the id is recomputable
/// from it. Finger table entries and RPC payloads copy these around freely.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Node {
    id: NodeId,
    addr: SocketAddr,
}

impl Node {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            id: addr.into(),
            addr,
        }
    }

    pub fn with_id(id: impl Into<NodeId>, addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            addr,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Snapshot of a node's ring pointers, as served by `get_info`.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeInfo {
    pub node: Node,
    pub predecessor: Option<Node>,
    pub successor: Option<Node>,
    pub fingers: Vec<Node>,
}
