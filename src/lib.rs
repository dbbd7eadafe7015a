//! Socket Hub - a WebSocket connection manager
//!
//! This library accepts WebSocket upgrades, assigns every connection a stable id,
//! tracks per-connection metadata and offers unicast/broadcast delivery plus
//! lifecycle events (`connection`, `message`, `close`, `error`, `listening`).

pub mod auth;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;

// Re-export main components
pub use config::ServerConfig;
pub use constants::*;
pub use core::{ConnectionManager, Event, EventKind, Payload};
pub use error::{Result, SocketHubError};
