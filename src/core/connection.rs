//! WebSocket connection record
//! Holds the outbound handle, attribution and metadata of one accepted link

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use warp::ws::Message;

/// Lifecycle of a connection. Only `Open` connections accept sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// Represents the state of a single WebSocket connection
pub struct Connection {
    pub id: String,
    sender: mpsc::UnboundedSender<Message>,
    pub remote_address: String,
    pub connected_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
    state: ConnectionState,
}

/// Snapshot of a connection handed out to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub remote_address: String,
    pub connected_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
    pub state: ConnectionState,
}

impl Connection {
    pub fn new(
        id: String,
        sender: mpsc::UnboundedSender<Message>,
        remote_address: String,
    ) -> Self {
        Self {
            id,
            sender,
            remote_address,
            connected_at: Utc::now(),
            metadata: Map::new(),
            state: ConnectionState::Open,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Queue a text frame. False when the connection is not open or the writer is gone.
    pub fn send_text(&self, text: &str) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.sender.send(Message::text(text)) {
            Ok(_) => true,
            Err(_) => {
                warn!("Failed to send message to client {}", self.id);
                false
            }
        }
    }

    /// Queue a close frame and move to `Closing`.
    ///
    /// Returns true if the frame was queued or the connection was already closing.
    pub fn close(&mut self, code: u16, reason: &str) -> bool {
        match self.state {
            ConnectionState::Open => {
                self.state = ConnectionState::Closing;
                match self.sender.send(Message::close_with(code, reason.to_string())) {
                    Ok(_) => true,
                    Err(_) => {
                        warn!("Failed to send close frame to client {}", self.id);
                        false
                    }
                }
            }
            ConnectionState::Closing => true,
            ConnectionState::Closed => false,
        }
    }

    pub(crate) fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Shallow merge: keys in `patch` overwrite, everything else is kept
    pub fn merge_metadata(&mut self, patch: Map<String, Value>) {
        self.metadata.extend(patch);
    }

    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id.clone(),
            remote_address: self.remote_address.clone(),
            connected_at: self.connected_at,
            metadata: self.metadata.clone(),
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_connection() -> (Connection, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new("c1".to_string(), tx, "10.0.0.1".to_string()), rx)
    }

    #[test]
    fn test_send_only_when_open() {
        let (mut conn, mut rx) = open_connection();
        assert!(conn.send_text("hello"));
        assert_eq!(rx.try_recv().unwrap().to_str().unwrap(), "hello");

        assert!(conn.close(1000, "bye"));
        assert_eq!(conn.state(), ConnectionState::Closing);
        let close = rx.try_recv().unwrap();
        assert_eq!(close.close_frame(), Some((1000, "bye")));

        assert!(!conn.send_text("late"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_is_idempotent_while_closing() {
        let (mut conn, mut rx) = open_connection();
        assert!(conn.close(1000, "first"));
        assert!(conn.close(4000, "second"));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        conn.mark_closed();
        assert!(!conn.close(1000, "third"));
    }

    #[test]
    fn test_send_fails_when_writer_dropped() {
        let (conn, rx) = open_connection();
        drop(rx);
        assert!(!conn.send_text("nobody listening"));
    }

    #[test]
    fn test_metadata_merge() {
        let (mut conn, _rx) = open_connection();
        conn.merge_metadata(json!({"a": 1}).as_object().cloned().unwrap());
        conn.merge_metadata(json!({"b": 2}).as_object().cloned().unwrap());
        conn.merge_metadata(json!({"a": 3}).as_object().cloned().unwrap());
        assert_eq!(Value::Object(conn.info().metadata), json!({"a": 3, "b": 2}));
    }
}
