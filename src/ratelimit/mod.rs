//! Rate limiting strategies.
//!
//! Three interchangeable algorithms share the [`RateLimiter`] contract. None
//! of them keeps state in process; every decision is one atomic call into the
//! shared counter store.

mod backend;
mod factory;
mod fixed_window;
mod key;
mod settings;
mod sliding_window;
pub(crate) mod token_bucket;

pub use backend::RateLimiter;
pub use factory::{new_limiter, LimiterBuilder};
pub use fixed_window::FixedWindowLimiter;
pub use key::RateLimitKey;
pub use settings::{Algorithm, LimiterSettings};
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;
