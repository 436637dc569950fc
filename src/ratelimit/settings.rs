//! Algorithm selection and validated limiter settings.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::LimiterConfig;
use crate::error::{GatekeeperError, Result};
use crate::store::TokenBucketParams;

/// The supported limiting algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Counter reset at fixed window boundaries
    FixedWindow,
    /// Timestamp log over a trailing window
    SlidingWindow,
    /// Capacity-bounded reservoir refilled at a constant rate
    TokenBucket,
}

impl Algorithm {
    /// The configuration name of this algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::TokenBucket => "token_bucket",
        }
    }

    /// The store key prefix owned by this algorithm.
    pub fn namespace(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fw",
            Algorithm::SlidingWindow => "sw",
            Algorithm::TokenBucket => "tb",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the exact configuration name; case and surrounding whitespace are
/// significant.
impl FromStr for Algorithm {
    type Err = GatekeeperError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed_window" => Ok(Algorithm::FixedWindow),
            "sliding_window" => Ok(Algorithm::SlidingWindow),
            "token_bucket" => Ok(Algorithm::TokenBucket),
            _ => Err(GatekeeperError::Config(format!(
                "unsupported rate limiting algorithm: {:?}. Valid options are: fixed_window, sliding_window, token_bucket",
                s
            ))),
        }
    }
}

/// An immutable, validated copy of the limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterSettings {
    /// Selected algorithm
    pub algorithm: Algorithm,
    /// Requests admitted per window (window algorithms)
    pub requests: u64,
    /// Window length (window algorithms)
    pub window: Duration,
    /// Bucket capacity (token bucket)
    pub bucket_capacity: u64,
    /// Tokens added per second (token bucket)
    pub refill_rate: u64,
}

impl LimiterSettings {
    /// Validate `config` for its selected algorithm.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        let algorithm: Algorithm = config.algorithm.parse()?;

        match algorithm {
            Algorithm::FixedWindow | Algorithm::SlidingWindow => {
                if config.requests == 0 {
                    return Err(invalid("requests must be a positive integer"));
                }
                if config.window_ms == 0 {
                    return Err(invalid("window_ms must be a positive duration"));
                }
            }
            Algorithm::TokenBucket => {
                if config.bucket_capacity == 0 {
                    return Err(invalid("bucket_capacity must be a positive integer"));
                }
                if config.refill_rate == 0 {
                    return Err(invalid("refill_rate must be a positive integer"));
                }
            }
        }

        Ok(Self {
            algorithm,
            requests: config.requests,
            window: Duration::from_millis(config.window_ms),
            bucket_capacity: config.bucket_capacity,
            refill_rate: config.refill_rate,
        })
    }

    /// Token bucket parameters for store calls.
    pub fn bucket(&self) -> TokenBucketParams {
        TokenBucketParams {
            capacity: self.bucket_capacity,
            refill_rate: self.refill_rate,
        }
    }
}

fn invalid(message: &str) -> GatekeeperError {
    GatekeeperError::Config(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(algorithm: &str) -> LimiterConfig {
        LimiterConfig {
            algorithm: algorithm.to_string(),
            ..LimiterConfig::default()
        }
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            "fixed_window".parse::<Algorithm>().unwrap(),
            Algorithm::FixedWindow
        );
        assert_eq!(
            "sliding_window".parse::<Algorithm>().unwrap(),
            Algorithm::SlidingWindow
        );
        assert_eq!(
            "token_bucket".parse::<Algorithm>().unwrap(),
            Algorithm::TokenBucket
        );

        let err = "leaky_bucket".parse::<Algorithm>().unwrap_err();
        assert!(err.to_string().contains("unsupported rate limiting algorithm"));
    }

    #[test]
    fn test_algorithm_names_are_exact() {
        assert!(" sliding_window".parse::<Algorithm>().is_err());
        assert!("Sliding_Window".parse::<Algorithm>().is_err());
        assert!("TOKEN_BUCKET".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_algorithm_names_round_trip() {
        for algorithm in [
            Algorithm::FixedWindow,
            Algorithm::SlidingWindow,
            Algorithm::TokenBucket,
        ] {
            assert_eq!(algorithm.as_str().parse::<Algorithm>().unwrap(), algorithm);
        }
    }

    #[test]
    fn test_window_algorithms_require_quota_and_window() {
        let mut cfg = config("fixed_window");
        cfg.requests = 0;
        assert!(LimiterSettings::from_config(&cfg).is_err());

        let mut cfg = config("sliding_window");
        cfg.window_ms = 0;
        assert!(LimiterSettings::from_config(&cfg).is_err());
    }

    #[test]
    fn test_token_bucket_ignores_window_fields() {
        let mut cfg = config("token_bucket");
        cfg.requests = 0;
        cfg.window_ms = 0;
        cfg.bucket_capacity = 5;
        cfg.refill_rate = 1;

        let settings = LimiterSettings::from_config(&cfg).unwrap();
        assert_eq!(settings.algorithm, Algorithm::TokenBucket);
        assert_eq!(
            settings.bucket(),
            TokenBucketParams {
                capacity: 5,
                refill_rate: 1
            }
        );

        cfg.refill_rate = 0;
        assert!(LimiterSettings::from_config(&cfg).is_err());
    }
}
