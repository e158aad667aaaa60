//! Completed-duration timers.
//!
//! Histogram buckets are fixed in microseconds to avoid floating point math on
//! the hot path; bucket counts are cumulative (`le` semantics). Published
//! percentiles are estimated from the same buckets at read time, so a timer
//! with percentiles fills the buckets even when it does not publish them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;

// 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
pub const BUCKETS_MICROS: [u64; 12] = [
    1_000, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000, 500_000, 1_000_000, 2_500_000,
    5_000_000, 10_000_000,
];

#[derive(Debug)]
pub struct Timer {
    count: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
    buckets: [AtomicU64; BUCKETS_MICROS.len()],
    histogram: bool,
    percentiles: Box<[f64]>,
}

impl Timer {
    pub fn new(histogram: bool) -> Self {
        Self::with_percentiles(histogram, &[])
    }

    pub fn with_percentiles(histogram: bool, percentiles: &[f64]) -> Self {
        Self {
            count: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            max_nanos: AtomicU64::new(0),
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            histogram,
            percentiles: percentiles.into(),
        }
    }

    /// Begin timing against `clock`.
    pub fn start(clock: &Arc<dyn Clock>) -> TimerSample {
        TimerSample {
            start_nanos: clock.now_nanos(),
            clock: Arc::clone(clock),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);

        let mut max = self.max_nanos.load(Ordering::Relaxed);
        while nanos > max {
            match self
                .max_nanos
                .compare_exchange_weak(max, nanos, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => max = actual,
            }
        }

        if self.histogram || !self.percentiles.is_empty() {
            let micros = nanos / 1_000;
            for (i, &b) in BUCKETS_MICROS.iter().enumerate() {
                if micros <= b {
                    self.buckets[i].fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed))
    }

    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed))
    }

    pub fn publishes_histogram(&self) -> bool {
        self.histogram
    }

    pub fn percentiles(&self) -> &[f64] {
        &self.percentiles
    }

    /// Estimate the `q` quantile by interpolating inside the bucket that holds
    /// the rank. Capped at the observed max; past the last bucket it is the max.
    pub fn percentile(&self, q: f64) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        let max_micros = self.max().as_micros() as u64;
        let rank = ((q.clamp(0.0, 1.0) * count as f64).ceil() as u64).max(1);

        let mut lower = 0;
        let mut below = 0;
        for (&le, bucket) in BUCKETS_MICROS.iter().zip(self.buckets.iter()) {
            let cumulative = bucket.load(Ordering::Relaxed);
            if cumulative >= rank {
                let width = le - lower;
                let inside = (cumulative - below).max(1);
                let offset = u128::from(width) * u128::from(rank - below) / u128::from(inside);
                let estimate = lower + offset as u64;
                return Duration::from_micros(estimate.min(max_micros));
            }
            lower = le;
            below = cumulative;
        }
        Duration::from_micros(max_micros)
    }

    /// `(quantile, estimate)` for every published percentile.
    pub fn percentile_values(&self) -> Vec<(f64, Duration)> {
        self.percentiles.iter().map(|&q| (q, self.percentile(q))).collect()
    }

    /// Cumulative `(le_micros, count)` pairs; empty when the histogram is off.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        if !self.histogram {
            return Vec::new();
        }
        BUCKETS_MICROS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&le, c)| (le, c.load(Ordering::Relaxed)))
            .collect()
    }
}

/// In-flight measurement started by [`Timer::start`].
pub struct TimerSample {
    start_nanos: u64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TimerSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerSample")
            .field("start_nanos", &self.start_nanos)
            .finish()
    }
}

impl TimerSample {
    pub fn start_nanos(&self) -> u64 {
        self.start_nanos
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.clock.now_nanos().saturating_sub(self.start_nanos))
    }

    /// Record into `timer` and return the measured duration.
    pub fn stop(&self, timer: &Timer) -> Duration {
        let elapsed = self.elapsed();
        timer.record(elapsed);
        elapsed
    }
}
