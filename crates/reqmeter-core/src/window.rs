//! Smoothly decaying rolling counter.
//!
//! The window is a ring of `chunks` buckets, each covering
//! `duration / chunks`. Buckets expire lazily: a writer that lands on a bucket
//! still stamped with an older slice resets it in the same CAS that adds its
//! own count, and readers simply skip buckets whose slice fell out of the
//! window. No sweeper thread is involved, and the reported sum drops one
//! bucket at a time instead of resetting at a hard boundary.
//!
//! Each bucket is one `AtomicU64`: the upper 32 bits hold the slice tag
//! (slice index truncated to `u32`), the lower 32 bits a saturating count.
//! Tags are compared only within one lap of the ring; anything further away
//! is expired. Truncated tags repeat every 2^32 slices, so the counter also
//! keeps the full index of its newest write. Once that write is a whole
//! window old the counter reads as empty, and the next writer clears every
//! bucket it finds before adding.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::{MeterError, Result};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_CHUNKS: usize = 10;

const COUNT_MASK: u64 = 0xFFFF_FFFF;
const HALF_RANGE: u32 = 1 << 31;

/// Window duration and bucket count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    duration: Duration,
    chunks: usize,
}

impl WindowSpec {
    pub fn new(duration: Duration, chunks: usize) -> Result<Self> {
        if chunks == 0 {
            return Err(MeterError::InvalidWindow("chunk count must be > 0".into()));
        }
        if duration.is_zero() {
            return Err(MeterError::InvalidWindow("duration must be > 0".into()));
        }
        if duration.as_nanos() < chunks as u128 {
            return Err(MeterError::InvalidWindow(format!(
                "duration {duration:?} is too short for {chunks} chunks"
            )));
        }
        if chunks as u64 >= HALF_RANGE as u64 {
            return Err(MeterError::InvalidWindow(format!(
                "chunk count {chunks} is too large"
            )));
        }
        Ok(Self { duration, chunks })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    fn chunk_nanos(&self) -> u64 {
        (self.duration.as_nanos() / self.chunks as u128) as u64
    }
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self {
            duration: DEFAULT_WINDOW,
            chunks: DEFAULT_CHUNKS,
        }
    }
}

#[inline]
fn pack(tag: u32, count: u32) -> u64 {
    ((tag as u64) << 32) | count as u64
}

#[inline]
fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, (word & COUNT_MASK) as u32)
}

/// `a` is `b` or one of the `chunks - 1` slices after it (wrap-aware).
#[inline]
fn within_lap(a: u32, b: u32, chunks: u32) -> bool {
    a.wrapping_sub(b) < chunks
}

/// Windowed event counter with lazy, per-bucket expiry.
pub struct RollingCounter {
    buckets: Box<[AtomicU64]>,
    /// Full slice index of the newest write.
    last_slice: AtomicU64,
    chunk_nanos: u64,
    spec: WindowSpec,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RollingCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingCounter")
            .field("spec", &self.spec)
            .field("sum", &self.sum())
            .finish()
    }
}

impl RollingCounter {
    pub fn new(spec: WindowSpec, clock: Arc<dyn Clock>) -> Self {
        let buckets = (0..spec.chunks())
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buckets,
            last_slice: AtomicU64::new(0),
            chunk_nanos: spec.chunk_nanos(),
            spec,
            clock,
        }
    }

    /// Validate `duration`/`chunks` and build the counter.
    pub fn with_window(duration: Duration, chunks: usize, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self::new(WindowSpec::new(duration, chunks)?, clock))
    }

    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    fn slice_now(&self) -> u64 {
        self.clock.now_nanos() / self.chunk_nanos
    }

    pub fn increment(&self) {
        self.add(1);
    }

    /// Record `n` events now.
    pub fn add(&self, n: u64) {
        if n == 0 {
            return;
        }
        let n = u32::try_from(n).unwrap_or(u32::MAX);
        let slice = self.slice_now();
        let tag = slice as u32;
        let chunks = self.buckets.len() as u32;
        let index = (slice % self.buckets.len() as u64) as usize;
        let bucket = &self.buckets[index];

        let first = bucket.load(Ordering::Acquire);
        let previous = self.last_slice.fetch_max(slice, Ordering::AcqRel);
        // Only the first writer after a full idle window sees this; every
        // word it finds is older than the window even when the tag matches.
        let revived = slice.saturating_sub(previous) >= self.buckets.len() as u64;

        let mut current = first;
        loop {
            let (bucket_tag, count) = unpack(current);
            let stale = revived && current == first;
            let next = if !stale && within_lap(bucket_tag, tag, chunks) {
                // Same slice, or a faster writer already rotated it: accumulate.
                pack(bucket_tag, count.saturating_add(n))
            } else {
                // Expired: reset and add as one unit.
                pack(tag, n)
            };
            match bucket.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if revived {
            self.clear_stale(slice, index);
        }
    }

    /// Empty every bucket except `skip` that was not written after `slice`.
    fn clear_stale(&self, slice: u64, skip: usize) {
        let chunks = self.buckets.len() as u64;
        let tag = slice as u32;
        let expired = pack(tag.wrapping_sub(chunks as u32), 0);
        for (i, bucket) in self.buckets.iter().enumerate() {
            if i == skip {
                continue;
            }
            let mut current = bucket.load(Ordering::Acquire);
            loop {
                let lead = u64::from(unpack(current).0.wrapping_sub(tag));
                if lead != 0 && lead < chunks && slice.wrapping_add(lead) % chunks == i as u64 {
                    break;
                }
                let swapped = bucket.compare_exchange_weak(
                    current,
                    expired,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                match swapped {
                    Ok(_) => break,
                    Err(actual) => current = actual,
                }
            }
        }
    }

    /// Approximate number of events over the trailing window.
    pub fn sum(&self) -> u64 {
        let now = self.slice_now();
        let newest = self.last_slice.load(Ordering::Acquire);
        if now.saturating_sub(newest) >= self.buckets.len() as u64 {
            return 0;
        }
        let now_tag = now as u32;
        let chunks = self.buckets.len() as u32;
        self.buckets
            .iter()
            .map(|b| unpack(b.load(Ordering::Acquire)))
            .filter(|&(tag, _)| within_lap(now_tag, tag, chunks))
            .map(|(_, count)| count as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use crate::clock::ManualClock;

    fn counter(clock: &Arc<ManualClock>) -> RollingCounter {
        RollingCounter::new(WindowSpec::default(), clock.clone())
    }

    #[test]
    fn rejects_degenerate_windows() {
        assert!(WindowSpec::new(Duration::from_secs(60), 0).is_err());
        assert!(WindowSpec::new(Duration::ZERO, 10).is_err());
        assert!(WindowSpec::new(Duration::from_nanos(5), 10).is_err());
        let err = WindowSpec::new(Duration::ZERO, 10).unwrap_err();
        assert_eq!(err.code().as_str(), "INVALID_WINDOW");
    }

    #[test]
    fn counts_within_one_chunk() {
        let clock = Arc::new(ManualClock::new());
        let c = counter(&clock);
        for _ in 0..7 {
            c.increment();
            clock.advance(Duration::from_millis(500));
        }
        assert_eq!(c.sum(), 7);
    }

    #[test]
    fn empties_after_a_full_window() {
        let clock = Arc::new(ManualClock::new());
        let c = counter(&clock);
        c.add(42);
        clock.advance(DEFAULT_WINDOW);
        assert_eq!(c.sum(), 0);
    }

    #[test]
    fn decays_one_bucket_at_a_time() {
        let clock = Arc::new(ManualClock::new());
        let c = counter(&clock);
        let chunk = Duration::from_secs(6);
        for _ in 0..10 {
            c.increment();
            clock.advance(chunk);
        }
        // Oldest bucket left the window; nine remain.
        assert_eq!(c.sum(), 9);
        clock.advance(chunk * 4);
        assert_eq!(c.sum(), 5);
    }

    #[test]
    fn expired_bucket_is_reset_on_write() {
        let clock = Arc::new(ManualClock::new());
        let c = counter(&clock);
        c.add(5);
        // Same ring position, next lap.
        clock.advance(DEFAULT_WINDOW);
        c.add(2);
        assert_eq!(c.sum(), 2);
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        let clock = Arc::new(ManualClock::at(Duration::from_secs(3)));
        let c = counter(&clock);
        let threads = 8;
        let per_thread = 10_000;
        std::thread::scope(|s| {
            for _ in 0..threads {
                s.spawn(|| {
                    for _ in 0..per_thread {
                        c.add(1);
                    }
                });
            }
        });
        assert_eq!(c.sum(), threads * per_thread);
    }

    #[test]
    fn concurrent_adds_across_rotation_keep_the_new_slice() {
        let clock = Arc::new(ManualClock::new());
        let c = counter(&clock);
        c.add(1_000);
        clock.advance(DEFAULT_WINDOW);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..500 {
                        c.increment();
                    }
                });
            }
        });
        assert_eq!(c.sum(), 2_000);
    }

    #[test]
    fn long_idle_does_not_revive_old_buckets() {
        let clock = Arc::new(ManualClock::new());
        let c = RollingCounter::with_window(Duration::from_secs(1), 1_000, clock.clone()).unwrap();
        c.add(5);
        clock.advance(Duration::from_secs(2));
        assert_eq!(c.sum(), 0);

        // Half the tag range later the old tag reads as a future slice.
        clock.set(Duration::from_millis((1u64 << 31) + 1_000));
        assert_eq!(c.sum(), 0);
        c.add(1);
        assert_eq!(c.sum(), 1);
    }

    #[test]
    fn tag_wrap_lands_on_the_same_bucket() {
        let clock = Arc::new(ManualClock::new());
        let c = RollingCounter::with_window(Duration::from_secs(1), 1_000, clock.clone()).unwrap();
        c.add(5);

        // Slice 1000 * 2^32: same ring position and same truncated tag.
        clock.set(Duration::from_millis(1_000 * (1u64 << 32)));
        assert_eq!(c.sum(), 0);
        c.add(1);
        assert_eq!(c.sum(), 1);
        c.add(2);
        assert_eq!(c.sum(), 3);
    }
}
