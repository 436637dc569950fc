//! Per-request admission decisions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use tracing::{debug, error, warn};

use super::identity::IdentityExtractor;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::ratelimit::RateLimiter;

/// Prefix of every key handed to the limiter.
pub const KEY_PREFIX: &str = "ratelimit:";

/// Outcome of admitting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Within quota; the request proceeds.
    Admit,
    /// Over quota.
    Reject,
    /// The counter store could not decide in time. The request is refused.
    Fail,
}

impl Admission {
    /// Machine-readable reason reported to the caller, if the request is refused.
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Admission::Admit => None,
            Admission::Reject => Some("rate_limit_exceeded"),
            Admission::Fail => Some("store_unavailable"),
        }
    }
}

/// Decides whether requests are admitted.
pub struct AdmissionController {
    limiter: Arc<dyn RateLimiter>,
    identity: IdentityExtractor,
    store_timeout: Duration,
    exempt_paths: Vec<String>,
}

impl AdmissionController {
    /// Create a controller applying `limiter` with the request settings in `config`.
    pub fn new(limiter: Arc<dyn RateLimiter>, config: &ServerConfig) -> Result<Self> {
        let identity =
            IdentityExtractor::new(&config.identity_header, config.trust_forwarded_for)?;
        Ok(Self {
            limiter,
            identity,
            store_timeout: config.store_timeout(),
            exempt_paths: config.exempt_paths.clone(),
        })
    }

    /// Whether requests to `path` skip admission entirely.
    ///
    /// An exempt prefix covers the path itself and everything below it at a
    /// `/` boundary: `/ping` exempts `/ping/deep` but not `/pingdom`.
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths
            .iter()
            .any(|prefix| !prefix.is_empty() && covers(prefix, path))
    }

    /// The identity of a request.
    pub fn identify(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        self.identity.identify(headers, peer)
    }

    /// Admit or refuse one request from `identity`.
    ///
    /// A store error or a call outliving the store timeout yields
    /// [`Admission::Fail`]; it is never treated as an admit.
    pub async fn check(&self, identity: &str) -> Admission {
        let key = format!("{}{}", KEY_PREFIX, identity);

        match tokio::time::timeout(self.store_timeout, self.limiter.allow(&key)).await {
            Ok(Ok(true)) => Admission::Admit,
            Ok(Ok(false)) => {
                debug!(
                    key = %key,
                    algorithm = %self.limiter.algorithm(),
                    "Rate limit exceeded"
                );
                Admission::Reject
            }
            Ok(Err(e)) => {
                error!(key = %key, error = %e, "Counter store call failed");
                Admission::Fail
            }
            Err(_) => {
                warn!(
                    key = %key,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "Counter store call timed out"
                );
                Admission::Fail
            }
        }
    }
}

fn covers(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}
