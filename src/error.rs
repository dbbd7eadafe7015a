use std::error::Error;
use std::fmt;

/// Boxed error returned by application callbacks (auth hooks, event handlers)
pub type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug)]
pub enum SocketHubError {
    // Listener errors
    BindError(String),
    AlreadyRunning,
    ShutdownError(String),

    // Configuration errors
    ConfigError(String),

    // Auth errors
    AuthRejected(String),
    AuthHandlerFailure(String),

    // Connection errors
    ConnectionError(String),
    SendFailure(String),

    // Dispatch errors
    HandlerFailure { event: String, message: String },

    // Messages errors
    SerializationError(String),
}

impl fmt::Display for SocketHubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BindError(msg) => write!(f, "Failed to bind listener: {}", msg),
            Self::AlreadyRunning => write!(f, "Server is already running"),
            Self::ShutdownError(msg) => write!(f, "Shutdown error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::AuthRejected(addr) => write!(f, "Connection from {} rejected by auth handler", addr),
            Self::AuthHandlerFailure(msg) => write!(f, "Auth handler failed: {}", msg),
            Self::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            Self::SendFailure(id) => write!(f, "Failed to send to client {}", id),
            Self::HandlerFailure { event, message } => {
                write!(f, "Handler for '{}' event failed: {}", event, message)
            }
            Self::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl Error for SocketHubError {}

impl From<serde_json::Error> for SocketHubError {
    fn from(err: serde_json::Error) -> Self {
        SocketHubError::SerializationError(err.to_string())
    }
}

// Generic result type for SocketHub
pub type Result<T> = std::result::Result<T, SocketHubError>;
