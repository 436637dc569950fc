//! Store key generation.

use std::fmt;

use super::settings::Algorithm;

/// The store key for one client under one algorithm.
///
/// Keys are rendered `"<namespace>:<identity>"`, so the same identity never
/// collides across algorithms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Algorithm namespace prefix (`fw`, `sw`, `tb`)
    pub namespace: &'static str,
    /// Opaque client identity
    pub identity: String,
}

impl RateLimitKey {
    /// Create a key for `identity` under `algorithm`'s namespace.
    pub fn new(algorithm: Algorithm, identity: &str) -> Self {
        Self {
            namespace: algorithm.namespace(),
            identity: identity.to_string(),
        }
    }

    /// The key of a companion entry, e.g. a token bucket's refill stamp.
    pub fn companion(&self, suffix: &str) -> String {
        format!("{}:{}", self, suffix)
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_rendering() {
        let key = RateLimitKey::new(Algorithm::FixedWindow, "ratelimit:u1");
        assert_eq!(key.to_string(), "fw:ratelimit:u1");

        let key = RateLimitKey::new(Algorithm::SlidingWindow, "ratelimit:u1");
        assert_eq!(key.to_string(), "sw:ratelimit:u1");
    }

    #[test]
    fn test_token_bucket_companion_key() {
        let key = RateLimitKey::new(Algorithm::TokenBucket, "ratelimit:10.0.0.1");
        assert_eq!(key.to_string(), "tb:ratelimit:10.0.0.1");
        assert_eq!(key.companion("ts"), "tb:ratelimit:10.0.0.1:ts");
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let keys: Vec<String> = [
            Algorithm::FixedWindow,
            Algorithm::SlidingWindow,
            Algorithm::TokenBucket,
        ]
        .into_iter()
        .map(|a| RateLimitKey::new(a, "same").to_string())
        .collect();

        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[1], keys[2]);
        assert_ne!(keys[0], keys[2]);
    }
}
