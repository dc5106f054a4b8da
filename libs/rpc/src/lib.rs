pub mod client;
pub mod server;

pub use client::RpcClient;
pub use server::ChordServer;

use rotunda_chord::{Node, NodeId, NodeInfo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// A node descriptor on the wire: the id as a hex string, the address as
/// `host:port`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMsg {
    pub id: String,
    pub addr: String,
}

impl From<&Node> for NodeMsg {
    fn from(node: &Node) -> Self {
        NodeMsg {
            id: node.id().to_hex(),
            addr: node.addr().to_string(),
        }
    }
}

impl TryFrom<NodeMsg> for Node {
    type Error = WireError;

    fn try_from(msg: NodeMsg) -> Result<Self, Self::Error> {
        let addr: SocketAddr = msg
            .addr
            .parse()
            .map_err(|_| WireError::new(&format!("invalid address: {:?}", msg.addr)))?;
        let id = NodeId::from_hex(&msg.id).map_err(|err| WireError::new(&err.to_string()))?;
        Ok(Node::with_id(id, addr))
    }
}

/// One request frame. Frames are newline-delimited JSON, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    FindSuccessor {
        key: String,
        #[serde(default)]
        requester: Option<NodeMsg>,
    },
    ClosestPrecedingFinger {
        key: String,
    },
    Notify {
        node: NodeMsg,
    },
    GetInfo,
    Ping {
        #[serde(default)]
        requester: Option<NodeMsg>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Response {
    FindSuccessor {
        node: Option<NodeMsg>,
        success: bool,
    },
    ClosestPrecedingFinger {
        node: Option<NodeMsg>,
        success: bool,
    },
    Notify,
    GetInfo {
        node: NodeMsg,
        predecessor: Option<NodeMsg>,
        successor: Option<NodeMsg>,
        fingers: Vec<NodeMsg>,
    },
    Ping {
        alive: bool,
    },
    Error {
        message: String,
    },
}

impl From<&NodeInfo> for Response {
    fn from(info: &NodeInfo) -> Self {
        Response::GetInfo {
            node: NodeMsg::from(&info.node),
            predecessor: info.predecessor.as_ref().map(NodeMsg::from),
            successor: info.successor.as_ref().map(NodeMsg::from),
            fingers: info.fingers.iter().map(NodeMsg::from).collect(),
        }
    }
}

impl TryFrom<Response> for NodeInfo {
    type Error = WireError;

    fn try_from(response: Response) -> Result<Self, Self::Error> {
        let Response::GetInfo {
            node,
            predecessor,
            successor,
            fingers,
        } = response
        else {
            return Err(WireError::new("expected a get_info response"));
        };

        Ok(NodeInfo {
            node: node.try_into()?,
            predecessor: predecessor.map(Node::try_from).transpose()?,
            successor: successor.map(Node::try_from).transpose()?,
            fingers: fingers
                .into_iter()
                .map(Node::try_from)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// A frame that parsed as JSON but does not describe a valid node.
#[derive(Debug)]
pub struct WireError {
    msg: String,
}

impl WireError {
    fn new(msg: &str) -> Self {
        WireError {
            msg: msg.to_string(),
        }
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for WireError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64) -> Node {
        Node::with_id(id, SocketAddr::from(([127, 0, 0, 1], 42000 + id as u16)))
    }

    #[test]
    fn node_round_trip() {
        let original = node(8);
        let msg = NodeMsg::from(&original);
        assert_eq!(msg.addr, "127.0.0.1:42008");
        assert_eq!(msg.id.len(), 40);

        let back = Node::try_from(msg).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn invalid_node_messages_are_rejected() {
        let bad_addr = NodeMsg {
            id: NodeId::from(8u64).to_hex(),
            addr: "not an address".to_string(),
        };
        assert!(Node::try_from(bad_addr).is_err());

        let bad_id = NodeMsg {
            id: "zz".to_string(),
            addr: "127.0.0.1:42008".to_string(),
        };
        assert!(Node::try_from(bad_id).is_err());
    }

    #[test]
    fn request_frames_are_tagged_by_op() {
        let request = Request::FindSuccessor {
            key: NodeId::from(8u64).to_hex(),
            requester: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"op\":\"find_successor\""));

        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);

        // The requester field may be omitted entirely.
        let json = format!(
            "{{\"op\":\"find_successor\",\"key\":\"{}\"}}",
            NodeId::from(8u64).to_hex()
        );
        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);

        let json = serde_json::to_string(&Request::GetInfo).unwrap();
        assert_eq!(json, "{\"op\":\"get_info\"}");
    }

    #[test]
    fn get_info_round_trip() {
        let info = NodeInfo {
            node: node(8),
            predecessor: Some(node(4)),
            successor: Some(node(16)),
            fingers: vec![node(16), node(32)],
        };

        let response = Response::from(&info);
        let json = serde_json::to_string(&response).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        let parsed = NodeInfo::try_from(back).unwrap();

        assert_eq!(parsed, info);
    }

    #[test]
    fn a_non_info_response_does_not_parse_as_info() {
        let response = Response::Ping { alive: true };
        assert!(NodeInfo::try_from(response).is_err());
    }
}
