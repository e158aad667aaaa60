//! reqmeter core: transport-agnostic request instrumentation.
//!
//! This crate owns the measurement and aggregation layer that runs once per
//! request lifecycle event: decaying rolling counters, the Apdex classifier,
//! the meter registry, the per-request timing context and the filter state
//! machine that drives it. It carries no HTTP server or runtime dependency so
//! any host can thread requests through it.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Instrumentation must never turn a request that would have succeeded into a
//! failure, so every fallible path surfaces as `MeterError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod apdex;
pub mod clock;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod meter;
pub mod naming;
pub mod recorder;
pub mod registry;
pub mod tags;
pub mod window;

/// Shared result type.
pub use error::{MeterError, Result};
