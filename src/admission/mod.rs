//! Request admission.
//!
//! Derives a client identity for each request, asks the configured limiter
//! whether it fits the quota, and refuses the request when it does not or when
//! the counter store cannot answer.

mod controller;
mod identity;
mod middleware;

pub use controller::{Admission, AdmissionController, KEY_PREFIX};
pub use identity::{strip_port, IdentityExtractor, UNKNOWN_IDENTITY};
pub use middleware::{admission_middleware, RefusalBody};
