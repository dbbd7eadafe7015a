// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_PATH: &str = "/";

// Close codes
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_NO_STATUS: u16 = 1005;
pub const CLOSE_ABNORMAL: u16 = 1006;
pub const CLOSE_UNAUTHORIZED: u16 = 4401;
pub const CLOSE_AUTH_ERROR: u16 = 4500;

// Close reasons
pub const REASON_SHUTDOWN: &str = "Server shutting down";
pub const REASON_DISCONNECTED: &str = "Disconnected by server";
pub const REASON_UNAUTHORIZED: &str = "Unauthorized";
pub const REASON_AUTH_ERROR: &str = "Authentication error";
pub const REASON_SERVER_STOPPED: &str = "Server stopped";

/// How long a rejected peer gets to answer our close frame
pub const CLOSE_HANDSHAKE_TIMEOUT_SECS: u64 = 5;
