use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::ws::Message as WsMessage;

use crate::core::connection::{ClientInfo, Connection};

// Live connections keyed by their generated id
pub struct Registry {
    connections: HashMap<String, Connection>,
    accepting: bool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            accepting: true,
        }
    }

    /// While false, `register` refuses new connections
    pub fn set_accepting(&mut self, accepting: bool) {
        self.accepting = accepting;
    }

    // Fresh v4 id, regenerated on the (astronomically unlikely) clash with a live entry
    fn next_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.connections.contains_key(&id) {
                return id;
            }
        }
    }

    /// Register a new open connection and return its id.
    ///
    /// `None` once the server has stopped accepting: an upgrade that finished after
    /// `stop` must not leave an entry behind.
    pub fn register(
        &mut self,
        sender: mpsc::UnboundedSender<WsMessage>,
        remote_address: String,
    ) -> Option<String> {
        if !self.accepting {
            debug!("Refusing registration from {}, server is stopping", remote_address);
            return None;
        }
        let id = self.next_id();
        let connection = Connection::new(id.clone(), sender, remote_address);
        self.connections.insert(id.clone(), connection);
        Some(id)
    }

    /// Remove a connection. Its outbound handle is dropped with it.
    pub fn unregister(&mut self, id: &str) -> Option<Connection> {
        self.connections.remove(id).map(|mut connection| {
            connection.mark_closed();
            connection
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    pub fn send_to(&self, id: &str, text: &str) -> bool {
        match self.connections.get(id) {
            Some(connection) => connection.send_text(text),
            None => {
                debug!("Send to unknown client {}", id);
                false
            }
        }
    }

    // Per-connection failures are logged by the connection and skipped
    pub fn broadcast(&self, text: &str, exclude_id: Option<&str>) -> usize {
        let mut success_count = 0;

        for (id, connection) in &self.connections {
            if exclude_id == Some(id.as_str()) {
                continue;
            }
            if connection.is_open() && connection.send_text(text) {
                success_count += 1;
            }
        }

        success_count
    }

    pub fn client_count(&self) -> usize {
        self.connections.len()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    pub fn client_info(&self, id: &str) -> Option<ClientInfo> {
        self.connections.get(id).map(Connection::info)
    }

    pub fn merge_metadata(&mut self, id: &str, patch: Map<String, Value>) -> bool {
        match self.connections.get_mut(id) {
            Some(connection) => {
                connection.merge_metadata(patch);
                true
            }
            None => false,
        }
    }

    /// Queue a close frame; the entry stays until the close path removes it
    pub fn disconnect(&mut self, id: &str, code: u16, reason: &str) -> bool {
        match self.connections.get_mut(id) {
            Some(connection) => connection.close(code, reason),
            None => false,
        }
    }

    /// Close every connection and empty the table. Returns how many were open.
    pub fn close_all(&mut self, code: u16, reason: &str) -> usize {
        let mut closed = 0;
        for (id, mut connection) in self.connections.drain() {
            if connection.is_open() {
                if connection.close(code, reason) {
                    closed += 1;
                } else {
                    warn!("Could not queue close frame for client {}", id);
                }
            }
            connection.mark_closed();
        }
        closed
    }
}

// Thread-safe registry wrapper
pub type SharedRegistry = Arc<RwLock<Registry>>;

pub fn create_registry() -> SharedRegistry {
    Arc::new(RwLock::new(Registry::new()))
}

// Registry mutations never panic mid-update, so a poisoned lock still holds a consistent table
pub fn read_registry(registry: &SharedRegistry) -> RwLockReadGuard<'_, Registry> {
    registry.read().unwrap_or_else(|e| {
        warn!("Registry lock was poisoned, recovering");
        PoisonError::into_inner(e)
    })
}

pub fn write_registry(registry: &SharedRegistry) -> RwLockWriteGuard<'_, Registry> {
    registry.write().unwrap_or_else(|e| {
        warn!("Registry lock was poisoned, recovering");
        PoisonError::into_inner(e)
    })
}
