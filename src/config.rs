//! Server configuration module
//! Handles listener parameters and the optional authentication hook

use crate::constants::{DEFAULT_HOST, DEFAULT_PATH, DEFAULT_PORT};
use crate::error::{Result, SocketHubError};
use crate::handlers::auth::AuthHandler;
use std::env;
use std::fmt;
use std::net::SocketAddr;

/// Server configuration parameters
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Only upgrade requests on exactly this path are accepted
    pub path: String,
    /// Whether upgrade requests from a foreign `Origin` are accepted
    pub allow_cors: bool,
    /// Optional predicate run against every upgrade request
    pub auth_handler: Option<AuthHandler>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("allow_cors", &self.allow_cors)
            .field("auth_handler", &self.auth_handler.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: DEFAULT_PATH.to_string(),
            allow_cors: true,
            auth_handler: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_allow_cors(mut self, allow_cors: bool) -> Self {
        self.allow_cors = allow_cors;
        self
    }

    pub fn with_auth_handler(mut self, handler: AuthHandler) -> Self {
        self.auth_handler = Some(handler);
        self
    }

    /// Load configuration from environment variables if available
    pub fn from_env() -> Result<Self> {
        let host = env::var("SOCKET_HUB_HOST").unwrap_or(DEFAULT_HOST.to_string());

        let port = match env::var("SOCKET_HUB_PORT").or_else(|_| env::var("PORT")) {
            Ok(raw) => parse_port(&raw)?,
            Err(_) => DEFAULT_PORT,
        };

        let path = env::var("SOCKET_HUB_PATH").unwrap_or(DEFAULT_PATH.to_string());

        let allow_cors = env::var("SOCKET_HUB_ALLOW_CORS")
            .map(|v| parse_flag(&v))
            .unwrap_or(true);

        let config = Self {
            host,
            port,
            path,
            allow_cors,
            auth_handler: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check path shape and that host/port form a bindable address
    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(SocketHubError::ConfigError(format!(
                "path must start with '/', got '{}'",
                self.path
            )));
        }
        self.socket_addr().map(|_| ())
    }

    /// Build the listener address
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                SocketHubError::ConfigError(format!(
                    "invalid listen address {}:{}: {}",
                    self.host, self.port, e
                ))
            })
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    raw.trim()
        .parse()
        .map_err(|_| SocketHubError::ConfigError(format!("invalid port '{}'", raw)))
}

fn parse_flag(raw: &str) -> bool {
    let v = raw.trim().to_lowercase();
    !(v == "false" || v == "0" || v == "no")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::auth::auth_handler;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.path, "/");
        assert!(config.allow_cors);
        assert!(config.auth_handler.is_none());
    }

    #[test]
    fn test_builder_setters() {
        let config = ServerConfig::new("127.0.0.1", 0)
            .with_path("/ws")
            .with_allow_cors(false)
            .with_auth_handler(auth_handler(|_| Ok(true)));
        assert_eq!(config.path, "/ws");
        assert!(!config.allow_cors);
        assert!(config.auth_handler.is_some());
        assert!(format!("{:?}", config).contains("<fn>"));
    }

    #[test]
    fn test_validate_rejects_relative_path() {
        let config = ServerConfig::new("127.0.0.1", 0).with_path("ws");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("path must start with '/'"));
    }

    #[test]
    fn test_validate_rejects_bad_host() {
        let config = ServerConfig::new("not a host", 80);
        assert!(matches!(config.validate(), Err(SocketHubError::ConfigError(_))));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_port(" 9000 ").unwrap(), 9000);
        assert!(parse_port("99999").is_err());
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("0"));
    }
}
