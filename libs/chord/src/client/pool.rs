use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{Client, Node, NodeId};

/// Cache of initialized clients, one per known peer.
#[derive(Debug)]
pub struct ClientsPool<C: Client> {
    clients: Arc<Mutex<HashMap<NodeId, Arc<C>>>>,
}

impl<C: Client> ClientsPool<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_init(&self, node: &Node) -> Arc<C> {
        let client = {
            let state = self.clients.lock().unwrap();
            state.get(&node.id()).cloned()
        };

        match client {
            Some(client) => client,
            None => {
                log::debug!("Initializing client for node: {}", node.addr());
                let client = Arc::new(C::init(node.addr()).await);
                {
                    let mut state = self.clients.lock().unwrap();
                    state.insert(node.id(), client.clone());
                }
                client
            }
        }
    }

    /// Drop a cached client. Called after any failed call so the next use
    /// starts from a fresh connection.
    pub fn invalidate(&self, id: &NodeId) {
        let mut state = self.clients.lock().unwrap();
        state.remove(id);
    }
}

impl<C: Client> Default for ClientsPool<C> {
    fn default() -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}
