//! Client identity derivation.

use std::net::{IpAddr, SocketAddr};

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{GatekeeperError, Result};

/// Identity used when a request carries nothing to identify it by.
pub const UNKNOWN_IDENTITY: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Derives the opaque client identity of a request.
///
/// Preference order: the configured identity header, then (only when
/// trusted) the first `X-Forwarded-For` hop, then the peer IP.
#[derive(Debug, Clone)]
pub struct IdentityExtractor {
    header: HeaderName,
    trust_forwarded_for: bool,
}

impl IdentityExtractor {
    /// Create an extractor reading `header`.
    pub fn new(header: &str, trust_forwarded_for: bool) -> Result<Self> {
        let header = HeaderName::from_bytes(header.as_bytes()).map_err(|e| {
            GatekeeperError::Config(format!("invalid identity header {:?}: {}", header, e))
        })?;
        Ok(Self {
            header,
            trust_forwarded_for,
        })
    }

    /// The identity of a request with `headers` from `peer`.
    pub fn identify(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if let Some(identity) = header_value(headers.get(&self.header)) {
            return identity.to_string();
        }

        if self.trust_forwarded_for {
            let first_hop = header_value(headers.get(FORWARDED_FOR))
                .and_then(|v| v.split(',').next())
                .map(|hop| strip_port(hop.trim()))
                .filter(|hop| !hop.is_empty());
            if let Some(hop) = first_hop {
                return hop.to_string();
            }
        }

        match peer {
            Some(addr) => addr.ip().to_string(),
            None => UNKNOWN_IDENTITY.to_string(),
        }
    }
}

fn header_value(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Remove a port suffix from a textual address.
///
/// Handles `host:port`, `[v6]:port` and `[v6]`, and leaves bare IP addresses
/// (including IPv6, whose colons are not a port separator) untouched.
pub fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split_once(']').map_or(addr, |(host, _)| host);
    }
    if addr.parse::<IpAddr>().is_ok() {
        return addr;
    }
    match addr.rsplit_once(':') {
        Some((host, port))
            if !host.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            host
        }
        _ => addr,
    }
}
