//! Gauges backed by a value provider.
//!
//! The registry never keeps the measured object alive on its own: callers
//! capture exactly what they intend to keep, and [`Gauge::weak`] captures a
//! `Weak` so the gauge reports `NaN` once the source has been dropped.

use std::sync::{Arc, Weak};

type Provider = Box<dyn Fn() -> Option<f64> + Send + Sync>;

pub struct Gauge {
    provider: Provider,
}

impl std::fmt::Debug for Gauge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gauge").field("value", &self.value()).finish()
    }
}

impl Gauge {
    /// `provider` returns `None` when its source is gone.
    pub fn new<F>(provider: F) -> Self
    where
        F: Fn() -> Option<f64> + Send + Sync + 'static,
    {
        Self {
            provider: Box::new(provider),
        }
    }

    /// Observe `source` through a weak reference.
    pub fn weak<T, F>(source: &Arc<T>, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        let weak: Weak<T> = Arc::downgrade(source);
        Self::new(move || weak.upgrade().map(|s| f(&s)))
    }

    /// Current value; `NaN` when the source is gone.
    pub fn value(&self) -> f64 {
        (self.provider)().unwrap_or(f64::NAN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn weak_gauge_reports_nan_after_drop() {
        let depth = Arc::new(AtomicUsize::new(3));
        let g = Gauge::weak(&depth, |d| d.load(Ordering::Relaxed) as f64);
        assert_eq!(g.value(), 3.0);
        depth.store(5, Ordering::Relaxed);
        assert_eq!(g.value(), 5.0);
        drop(depth);
        assert!(g.value().is_nan());
    }
}
