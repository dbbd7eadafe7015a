//! Request handlers for the upgrade endpoint

pub mod auth;
pub mod websocket;

pub use auth::{auth_handler, AuthHandler, UpgradeRequest};
pub use websocket::handle_ws_client;
