//! Per-request timing state that survives async continuations.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use crate::lifecycle::routes::{RequestInfo, RouteHandler};
use crate::meter::{LongTaskSample, TimerSample};

const STARTED: u8 = 0;
const SUSPENDED: u8 = 1;
const COMPLETED: u8 = 2;

/// Lifecycle phase of a [`TimingContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Started,
    Suspended,
    Completed,
}

/// Captured at the first dispatch of a request and finalized exactly once.
#[derive(Debug)]
pub struct TimingContext {
    request: RequestInfo,
    handler: Option<Arc<RouteHandler>>,
    sample: TimerSample,
    long_tasks: Mutex<Vec<LongTaskSample>>,
    state: AtomicU8,
}

impl TimingContext {
    pub fn new(
        request: RequestInfo,
        handler: Option<Arc<RouteHandler>>,
        sample: TimerSample,
        long_tasks: Vec<LongTaskSample>,
    ) -> Self {
        Self {
            request,
            handler,
            sample,
            long_tasks: Mutex::new(long_tasks),
            state: AtomicU8::new(STARTED),
        }
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn handler(&self) -> Option<&RouteHandler> {
        self.handler.as_deref()
    }

    pub fn sample(&self) -> &TimerSample {
        &self.sample
    }

    pub fn elapsed(&self) -> Duration {
        self.sample.elapsed()
    }

    pub fn phase(&self) -> Phase {
        match self.state.load(Ordering::Acquire) {
            STARTED => Phase::Started,
            SUSPENDED => Phase::Suspended,
            _ => Phase::Completed,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.phase() == Phase::Completed
    }

    /// `Started -> Suspended`. False if the context was not running.
    pub fn suspend(&self) -> bool {
        self.state
            .compare_exchange(STARTED, SUSPENDED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `Suspended -> Started`. False if the context was not suspended.
    pub fn resume(&self) -> bool {
        self.state
            .compare_exchange(SUSPENDED, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Move to `Completed`. Only the first caller gets `true`.
    pub fn try_complete(&self) -> bool {
        self.state.swap(COMPLETED, Ordering::AcqRel) != COMPLETED
    }

    /// Hand the running long-task samples to the finalizer.
    pub fn take_long_tasks(&self) -> Vec<LongTaskSample> {
        let mut guard = self.long_tasks.lock().unwrap_or_else(|p| p.into_inner());
        std::mem::take(&mut *guard)
    }
}

/// Create-once cell the host attaches to a request.
///
/// Clones share the same cell, so every dispatch phase of one request sees
/// the context created by the first.
#[derive(Debug, Clone, Default)]
pub struct TimingSlot {
    cell: Arc<OnceLock<Arc<TimingContext>>>,
}

impl TimingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<TimingContext>> {
        self.cell.get().cloned()
    }

    /// Attach the context built by `make` unless one is already attached.
    /// Returns the attached context and whether this call created it.
    pub fn get_or_attach<F>(&self, make: F) -> (Arc<TimingContext>, bool)
    where
        F: FnOnce() -> TimingContext,
    {
        let mut created = false;
        let ctx = self.cell.get_or_init(|| {
            created = true;
            Arc::new(make())
        });
        (Arc::clone(ctx), created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::meter::Timer;

    fn context(clock: &Arc<dyn Clock>) -> TimingContext {
        TimingContext::new(RequestInfo::new("GET", "/"), None, Timer::start(clock), Vec::new())
    }

    #[test]
    fn suspend_resume_complete() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let ctx = context(&clock);
        assert_eq!(ctx.phase(), Phase::Started);
        assert!(ctx.suspend());
        assert!(!ctx.suspend());
        assert!(ctx.resume());
        assert!(ctx.try_complete());
        assert!(!ctx.try_complete());
        assert!(!ctx.resume());
        assert_eq!(ctx.phase(), Phase::Completed);
    }

    #[test]
    fn slot_creates_once() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let slot = TimingSlot::new();
        let shared = slot.clone();
        let (a, created_a) = slot.get_or_attach(|| context(&clock));
        let (b, created_b) = shared.get_or_attach(|| context(&clock));
        assert!(created_a);
        assert!(!created_b);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn concurrent_attach_has_one_winner() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
        let slot = TimingSlot::new();
        let wins = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let (_, created) = slot.get_or_attach(|| context(&clock));
                    if created {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });
        assert_eq!(wins.load(Ordering::Relaxed), 1);
    }
}
