//! Authentication and origin checks for incoming upgrade requests

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use url::Url;
use warp::http::HeaderMap;

use crate::error::BoxError;

/// The request that asked for an upgrade, as seen by auth hooks and `connection` handlers
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

impl UpgradeRequest {
    /// Header value as text, `None` when absent or not valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Pluggable predicate deciding whether an upgrade request may connect.
///
/// `Ok(false)` rejects the peer, `Err` (or a panic) is treated as a handler failure.
pub type AuthHandler =
    Arc<dyn Fn(&UpgradeRequest) -> std::result::Result<bool, BoxError> + Send + Sync>;

/// Wrap a closure as an [`AuthHandler`]
pub fn auth_handler<F>(handler: F) -> AuthHandler
where
    F: Fn(&UpgradeRequest) -> std::result::Result<bool, BoxError> + Send + Sync + 'static,
{
    Arc::new(handler)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted,
    Rejected,
    HandlerFailed(String),
}

/// Run the optional hook against a request
pub fn authenticate(handler: Option<&AuthHandler>, request: &UpgradeRequest) -> AuthOutcome {
    let Some(handler) = handler else {
        return AuthOutcome::Accepted;
    };

    match catch_unwind(AssertUnwindSafe(|| handler(request))) {
        Ok(Ok(true)) => AuthOutcome::Accepted,
        Ok(Ok(false)) => AuthOutcome::Rejected,
        Ok(Err(e)) => {
            log::error!("Authentication error: {}", e);
            AuthOutcome::HandlerFailed(e.to_string())
        }
        Err(_) => {
            log::error!("Authentication handler panicked");
            AuthOutcome::HandlerFailed("auth handler panicked".to_string())
        }
    }
}

/// Same-origin check used when cross-origin upgrades are disabled.
///
/// Requests without an `Origin` header come from non-browser peers and pass.
pub fn is_same_origin(headers: &HeaderMap) -> bool {
    let Some(origin) = headers.get("origin") else {
        return true;
    };
    let Some(host) = headers.get("host").and_then(|h| h.to_str().ok()) else {
        log::warn!("Origin present without Host header, rejecting");
        return false;
    };

    let origin = match origin.to_str().ok().and_then(|o| Url::parse(o).ok()) {
        Some(url) => url,
        None => {
            log::warn!("Unparsable Origin header {:?}", origin);
            return false;
        }
    };

    let Some(origin_host) = origin.host_str() else {
        return false;
    };

    // `Url` drops default ports, so fill them back in when Host names one explicitly
    let host_has_port = host
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
    let origin_port = if host_has_port {
        origin.port_or_known_default()
    } else {
        origin.port()
    };
    let origin_authority = match origin_port {
        Some(port) => format!("{}:{}", origin_host, port),
        None => origin_host.to_string(),
    };

    if origin_authority.eq_ignore_ascii_case(host) {
        true
    } else {
        log::warn!("Cross-origin upgrade from {} to {} refused", origin_authority, host);
        false
    }
}
