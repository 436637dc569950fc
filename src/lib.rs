//! Gatekeeper - Distributed Request Admission Service
//!
//! This crate implements per-client request admission for HTTP services. Three
//! interchangeable rate limiting algorithms keep all of their state in a shared
//! counter store (Redis, or process memory for a single instance), so any
//! number of instances enforce one logical quota per client.

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod server;
pub mod store;
