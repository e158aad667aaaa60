//! Long-task timers: in-flight operations rather than completed durations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::Clock;

pub struct LongTaskTimer {
    active: DashMap<u64, u64>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LongTaskTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongTaskTimer")
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}

impl LongTaskTimer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            active: DashMap::new(),
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    /// Mark one task active until the returned sample is stopped or dropped.
    pub fn start(self: &Arc<Self>) -> LongTaskSample {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active.insert(id, self.clock.now_nanos());
        LongTaskSample {
            timer: Arc::clone(self),
            id,
            stopped: false,
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.active.len()
    }

    /// Summed running time of all active tasks.
    pub fn duration(&self) -> Duration {
        let now = self.clock.now_nanos();
        let nanos: u64 = self
            .active
            .iter()
            .map(|e| now.saturating_sub(*e.value()))
            .sum();
        Duration::from_nanos(nanos)
    }

    fn finish(&self, id: u64) -> Option<Duration> {
        let (_, start) = self.active.remove(&id)?;
        Some(Duration::from_nanos(self.clock.now_nanos().saturating_sub(start)))
    }
}

/// Handle for one active task.
#[derive(Debug)]
pub struct LongTaskSample {
    timer: Arc<LongTaskTimer>,
    id: u64,
    stopped: bool,
}

impl LongTaskSample {
    /// Remove the task from the active set. Later calls return `None`.
    pub fn stop(&mut self) -> Option<Duration> {
        if self.stopped {
            return None;
        }
        self.stopped = true;
        self.timer.finish(self.id)
    }
}

impl Drop for LongTaskSample {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn tracks_active_tasks_until_stopped() {
        let manual = Arc::new(ManualClock::new());
        let ltt = Arc::new(LongTaskTimer::new(manual.clone()));
        let mut a = ltt.start();
        manual.advance(Duration::from_secs(2));
        let b = ltt.start();
        manual.advance(Duration::from_secs(1));
        assert_eq!(ltt.active_tasks(), 2);
        assert_eq!(ltt.duration(), Duration::from_secs(4));

        assert_eq!(a.stop(), Some(Duration::from_secs(3)));
        assert_eq!(a.stop(), None);
        assert_eq!(ltt.active_tasks(), 1);

        drop(b);
        assert_eq!(ltt.active_tasks(), 0);
    }
}
