//! Meter primitives held by the registry.
//!
//! All meters are updated through shared references: counters and timers are
//! atomics, long-task timers keep their active set in a `DashMap`, gauges pull
//! from a caller-supplied value provider at scrape time.

pub mod counter;
pub mod gauge;
pub mod long_task;
pub mod timer;

use std::sync::Arc;

pub use counter::Counter;
pub use gauge::Gauge;
pub use long_task::{LongTaskSample, LongTaskTimer};
pub use timer::{Timer, TimerSample};

/// Kind tag used for registration checks and discovery filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeterKind {
    Counter,
    Timer,
    LongTaskTimer,
    Gauge,
}

impl MeterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MeterKind::Counter => "counter",
            MeterKind::Timer => "timer",
            MeterKind::LongTaskTimer => "long_task_timer",
            MeterKind::Gauge => "gauge",
        }
    }
}

/// A registered meter handle.
#[derive(Clone)]
pub enum Meter {
    Counter(Arc<Counter>),
    Timer(Arc<Timer>),
    LongTaskTimer(Arc<LongTaskTimer>),
    Gauge(Arc<Gauge>),
}

impl Meter {
    pub fn kind(&self) -> MeterKind {
        match self {
            Meter::Counter(_) => MeterKind::Counter,
            Meter::Timer(_) => MeterKind::Timer,
            Meter::LongTaskTimer(_) => MeterKind::LongTaskTimer,
            Meter::Gauge(_) => MeterKind::Gauge,
        }
    }
}
