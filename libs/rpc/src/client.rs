use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use error_stack::{Report, Result};
use rotunda_chord::client::{ClientError, CALL_TIMEOUT};
use rotunda_chord::{Client, Node, NodeId, NodeInfo};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::{NodeMsg, Request, Response};

/// JSON-over-TCP chord client.
///
/// Keeps at most one connection to the peer, opened lazily. A connection
/// that produced any error is dropped on the spot; the next call dials
/// again. Every call runs under the shared [`CALL_TIMEOUT`] deadline.
#[derive(Debug)]
pub struct RpcClient {
    addr: SocketAddr,
    stream: Mutex<Option<BufReader<TcpStream>>>,
    timeout: Duration,
}

// A clone is a fresh handle to the same peer; connections are not shared.
impl Clone for RpcClient {
    fn clone(&self) -> Self {
        Self::with_timeout(self.addr, self.timeout)
    }
}

impl RpcClient {
    pub fn with_timeout(addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            addr,
            stream: Mutex::new(None),
            timeout,
        }
    }

    async fn connect(&self) -> Result<TcpStream, ClientError> {
        match tokio::time::timeout(self.timeout, TcpStream::connect(self.addr)).await {
            Err(_) => Err(Report::new(ClientError::Timeout(self.addr))),
            Ok(Err(err)) => Err(Report::new(ClientError::Unreachable(self.addr))
                .attach_printable(err.to_string())),
            Ok(Ok(stream)) => Ok(stream),
        }
    }

    /// Send one frame and read one back. The connection is only put back
    /// into the cache when the whole exchange succeeded.
    async fn call(&self, request: &Request) -> Result<Response, ClientError> {
        let mut guard = self.stream.lock().await;
        let mut stream = match guard.take() {
            Some(stream) => stream,
            None => BufReader::new(self.connect().await?),
        };

        let response = self.exchange(&mut stream, request).await?;
        *guard = Some(stream);
        Ok(response)
    }

    async fn exchange(
        &self,
        stream: &mut BufReader<TcpStream>,
        request: &Request,
    ) -> Result<Response, ClientError> {
        let mut frame = serde_json::to_string(request)
            .map_err(|err| Report::new(ClientError::InvalidRequest(err.to_string())))?;
        frame.push('\n');

        let io = async {
            stream.get_mut().write_all(frame.as_bytes()).await?;
            let mut line = String::new();
            stream.read_line(&mut line).await?;
            std::io::Result::Ok(line)
        };

        let line = match tokio::time::timeout(self.timeout, io).await {
            Err(_) => return Err(Report::new(ClientError::Timeout(self.addr))),
            Ok(Err(err)) => {
                return Err(Report::new(ClientError::Unreachable(self.addr))
                    .attach_printable(err.to_string()))
            }
            // An empty read is the peer closing on us.
            Ok(Ok(line)) if line.is_empty() => {
                return Err(Report::new(ClientError::Unreachable(self.addr)))
            }
            Ok(Ok(line)) => line,
        };

        match serde_json::from_str(&line) {
            Ok(Response::Error { message }) => Err(Report::new(ClientError::Remote(message))),
            Ok(response) => Ok(response),
            Err(err) => Err(Report::new(ClientError::Remote(format!(
                "malformed response: {}",
                err
            )))),
        }
    }
}

fn node_from_msg(msg: NodeMsg) -> Result<Node, ClientError> {
    Node::try_from(msg).map_err(|err| Report::new(ClientError::Remote(err.to_string())))
}

fn unexpected(response: Response) -> Report<ClientError> {
    Report::new(ClientError::Remote(format!(
        "unexpected response: {:?}",
        response
    )))
}

#[async_trait]
impl Client for RpcClient {
    async fn init(addr: SocketAddr) -> Self {
        Self::with_timeout(addr, CALL_TIMEOUT)
    }

    async fn find_successor(&self, id: NodeId) -> Result<Node, ClientError> {
        let request = Request::FindSuccessor {
            key: id.to_hex(),
            requester: None,
        };
        match self.call(&request).await? {
            Response::FindSuccessor {
                node: Some(node), ..
            } => node_from_msg(node),
            Response::FindSuccessor { node: None, .. } => Err(Report::new(ClientError::Remote(
                "peer could not resolve the successor".to_string(),
            ))),
            other => Err(unexpected(other)),
        }
    }

    async fn closest_preceding_finger(&self, id: NodeId) -> Result<Node, ClientError> {
        let request = Request::ClosestPrecedingFinger { key: id.to_hex() };
        match self.call(&request).await? {
            Response::ClosestPrecedingFinger {
                node: Some(node), ..
            } => node_from_msg(node),
            Response::ClosestPrecedingFinger { node: None, .. } => Err(Report::new(
                ClientError::Remote("peer rejected the key".to_string()),
            )),
            other => Err(unexpected(other)),
        }
    }

    async fn get_info(&self) -> Result<NodeInfo, ClientError> {
        match self.call(&Request::GetInfo).await? {
            response @ Response::GetInfo { .. } => NodeInfo::try_from(response)
                .map_err(|err| Report::new(ClientError::Remote(err.to_string()))),
            other => Err(unexpected(other)),
        }
    }

    async fn notify(&self, predecessor: Node) -> Result<(), ClientError> {
        let request = Request::Notify {
            node: NodeMsg::from(&predecessor),
        };
        match self.call(&request).await? {
            Response::Notify => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn ping(&self) -> Result<(), ClientError> {
        match self.call(&Request::Ping { requester: None }).await? {
            Response::Ping { alive: true } => Ok(()),
            Response::Ping { alive: false } => Err(Report::new(ClientError::Remote(
                "peer reported itself not alive".to_string(),
            ))),
            other => Err(unexpected(other)),
        }
    }
}
