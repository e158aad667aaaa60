//! Counters: cumulative, or windowed over a decaying rolling window.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::window::RollingCounter;

#[derive(Debug)]
pub enum Counter {
    /// Monotonic total since registration.
    Cumulative(AtomicU64),
    /// Events over the trailing window; decays when traffic stops.
    Windowed(RollingCounter),
}

impl Counter {
    pub fn cumulative() -> Self {
        Counter::Cumulative(AtomicU64::new(0))
    }

    pub fn windowed(window: RollingCounter) -> Self {
        Counter::Windowed(window)
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        match self {
            Counter::Cumulative(total) => {
                total.fetch_add(n, Ordering::Relaxed);
            }
            Counter::Windowed(window) => window.add(n),
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            Counter::Cumulative(total) => total.load(Ordering::Relaxed),
            Counter::Windowed(window) => window.sum(),
        }
    }

    pub fn is_windowed(&self) -> bool {
        matches!(self, Counter::Windowed(_))
    }
}
