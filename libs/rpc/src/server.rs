use std::net::SocketAddr;
use std::sync::Arc;

use rotunda_chord::{Client, Node, NodeId, NodeService};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::{NodeMsg, Request, Response};

/// The inbound side of a node: accepts connections on the listen address
/// and dispatches request frames into the node service.
///
/// Connections are handled on their own tasks, so lookups from different
/// peers proceed concurrently; mutations serialize on the node's own lock.
pub struct ChordServer<C: Client + Clone + Sync + Send + 'static> {
    service: Arc<NodeService<C>>,
}

impl<C: Client + Clone + Sync + Send + 'static> ChordServer<C> {
    pub fn new(service: Arc<NodeService<C>>) -> Self {
        Self { service }
    }

    /// Bind the listen address. A bind failure is fatal and stays with the
    /// caller; nothing about the node has started at that point.
    pub async fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
        TcpListener::bind(addr).await
    }

    /// Accept loop. Returns once the node has been stopped; new connections
    /// are refused from then on because the listener is dropped with it.
    pub async fn serve(self, listener: TcpListener) {
        let mut shutdown = self.service.subscribe_shutdown();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        log::debug!("Accepted connection from {}", peer);
                        let service = self.service.clone();
                        tokio::spawn(handle_connection(service, stream, peer));
                    }
                    Err(err) => log::warn!("Failed to accept a connection: {}", err),
                },
                _ = shutdown.wait_for(|stop| *stop) => {
                    log::info!("Listener shutting down");
                    break;
                }
            }
        }
    }
}

/// Read newline-delimited JSON frames until the peer disconnects or the
/// node stops, answering each with exactly one response frame.
async fn handle_connection<C: Client + Clone + Sync + Send + 'static>(
    service: Arc<NodeService<C>>,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let mut shutdown = service.subscribe_shutdown();
    let mut stream = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            read = stream.read_line(&mut line) => read,
            _ = shutdown.wait_for(|stop| *stop) => break,
        };

        match read {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                log::debug!("Connection from {} failed: {}", peer, err);
                break;
            }
        }

        let response = match serde_json::from_str::<Request>(line.trim_end()) {
            Ok(request) => dispatch(&service, request).await,
            Err(err) => Response::Error {
                message: format!("malformed request: {}", err),
            },
        };

        let mut frame = match serde_json::to_string(&response) {
            Ok(frame) => frame,
            Err(err) => {
                log::error!("Failed to encode a response: {}", err);
                break;
            }
        };
        frame.push('\n');

        if let Err(err) = stream.get_mut().write_all(frame.as_bytes()).await {
            log::debug!("Failed to answer {}: {}", peer, err);
            break;
        }
    }
}

async fn dispatch<C: Client + Clone + Sync + Send + 'static>(
    service: &NodeService<C>,
    request: Request,
) -> Response {
    service.metrics().record_message();

    match request {
        Request::FindSuccessor { key, requester } => {
            if let Some(requester) = &requester {
                log::debug!("find_successor({}) on behalf of {}", key, requester.addr);
            }
            match NodeId::from_hex(&key) {
                Ok(id) => match service.find_successor(id).await {
                    Ok(lookup) => Response::FindSuccessor {
                        node: Some(NodeMsg::from(&lookup.node)),
                        success: !lookup.degraded,
                    },
                    Err(report) => {
                        log::error!("find_successor failed: {:?}", report);
                        Response::FindSuccessor {
                            node: None,
                            success: false,
                        }
                    }
                },
                Err(err) => {
                    log::debug!("Rejecting lookup: {}", err);
                    Response::FindSuccessor {
                        node: None,
                        success: false,
                    }
                }
            }
        }

        Request::ClosestPrecedingFinger { key } => match NodeId::from_hex(&key) {
            Ok(id) => Response::ClosestPrecedingFinger {
                node: Some(NodeMsg::from(&service.closest_preceding_node(id))),
                success: true,
            },
            Err(err) => {
                log::debug!("Rejecting closest_preceding_finger: {}", err);
                Response::ClosestPrecedingFinger {
                    node: None,
                    success: false,
                }
            }
        },

        Request::Notify { node } => match Node::try_from(node) {
            Ok(caller) => {
                service.notify(caller);
                Response::Notify
            }
            Err(err) => Response::Error {
                message: err.to_string(),
            },
        },

        Request::GetInfo => Response::from(&service.info()),

        Request::Ping { requester: _ } => Response::Ping { alive: true },
    }
}
