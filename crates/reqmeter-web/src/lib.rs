//! reqmeter web integration.
//!
//! Wires the core filter into an axum router: strict YAML config, shared
//! application state, the request-tracking middleware, and read-only ops and
//! discovery endpoints. Consumed by the binary (`main.rs`) and by integration
//! tests.

pub mod app_state;
pub mod config;
pub mod demo;
pub mod error;
pub mod middleware;
pub mod ops;
pub mod router;
