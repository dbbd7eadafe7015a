//! Remote address attribution for WebSocket connections
//!
//! Proxies put the original client first in `X-Forwarded-For`; when that header is
//! present its first entry wins over the socket peer address.

use log::debug;
use std::net::SocketAddr;
use warp::http::HeaderMap;

pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Best-effort client address: forwarded-for first entry, then the socket IP
pub fn extract_remote_address(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> String {
    if let Some(forwarded) = forwarded_for(headers) {
        debug!("Using X-Forwarded-For address: {}", forwarded);
        return forwarded;
    }

    match remote_addr {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_ADDRESS.to_string(),
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    // "client, proxy1, proxy2"
    let first = value.split(',').next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::http::HeaderValue;

    #[test]
    fn test_socket_address_without_header() {
        let headers = HeaderMap::new();
        let remote = Some("203.0.113.1:12345".parse().unwrap());
        assert_eq!(extract_remote_address(&headers, remote), "203.0.113.1");
    }

    #[test]
    fn test_forwarded_for_first_entry_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 198.51.100.7 , 203.0.113.100"),
        );
        let remote = Some("203.0.113.100:12345".parse().unwrap());
        assert_eq!(extract_remote_address(&headers, remote), "198.51.100.7");
    }

    #[test]
    fn test_empty_forwarded_for_falls_back() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" , 10.0.0.1"));
        let remote = Some("[::1]:9000".parse().unwrap());
        assert_eq!(extract_remote_address(&headers, remote), "::1");
    }

    #[test]
    fn test_unknown_when_nothing_available() {
        assert_eq!(extract_remote_address(&HeaderMap::new(), None), UNKNOWN_ADDRESS);
    }
}
