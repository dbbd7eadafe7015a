//! Core functionality for the connection manager

pub mod connection;
pub mod events;
pub mod ip_extractor;
pub mod message;
pub mod registry;
pub mod server;

// Re-export main components for convenience
pub use connection::{ClientInfo, Connection, ConnectionState};
pub use events::{
    CloseEvent, ConnectionEvent, Dispatcher, ErrorEvent, Event, EventHandler, EventKind,
    HandlerResult, ListeningEvent, MessageEvent,
};
pub use message::{DecodedMessage, Payload};
pub use registry::{create_registry, Registry, SharedRegistry};
pub use server::ConnectionManager;
