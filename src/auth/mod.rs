//! Ready-made authentication strategies for the upgrade hook

pub mod token;

// Re-export main components
pub use token::{extract_bearer_token, Claims, TokenManager};
