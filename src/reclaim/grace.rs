// Grace period tracking between realtime readers and the reclamation tick
//
// Every realtime traversal pass is bracketed by a `ReaderPass` guard that
// counts itself into the current epoch's bucket. Marking closes the epoch:
// the control side then waits until the closed bucket drains, which means every
// pass that could have seen something unlinked before the mark has ended.
// Any number of readers may run passes concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct ClockState {
    epoch: AtomicU64,
    in_flight: [AtomicUsize; 2],
    started: AtomicU64,
    completed: AtomicU64,
    attached: AtomicUsize,
}

/// Shared pass counter between the realtime readers and the control side
#[derive(Debug, Clone, Default)]
pub struct ReaderClock {
    inner: Arc<ClockState>,
}

impl ReaderClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a realtime reader. Until the registration is dropped the
    /// control side waits for reader passes before reclaiming.
    pub fn attach(&self) -> ReaderRegistration {
        self.inner.attached.fetch_add(1, Ordering::SeqCst);
        ReaderRegistration {
            clock: self.clone(),
        }
    }

    /// Start a traversal pass (realtime side). The pass ends when the guard drops.
    ///
    /// Wait-free unless the control side closes an epoch at the same moment,
    /// in which case the pass re-registers in the new one.
    pub fn begin_pass(&self) -> ReaderPass<'_> {
        let state = &self.inner;
        let bucket = loop {
            let epoch = state.epoch.load(Ordering::SeqCst);
            let bucket = (epoch & 1) as usize;
            state.in_flight[bucket].fetch_add(1, Ordering::SeqCst);
            if state.epoch.load(Ordering::SeqCst) == epoch {
                break bucket;
            }
            state.in_flight[bucket].fetch_sub(1, Ordering::SeqCst);
        };
        state.started.fetch_add(1, Ordering::SeqCst);
        ReaderPass {
            clock: self,
            bucket,
        }
    }

    pub fn started_passes(&self) -> u64 {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn completed_passes(&self) -> u64 {
        self.inner.completed.load(Ordering::SeqCst)
    }

    pub fn attached_readers(&self) -> usize {
        self.inner.attached.load(Ordering::SeqCst)
    }

    /// Close the current epoch, returning its bucket
    fn close_epoch(&self) -> usize {
        (self.inner.epoch.fetch_add(1, Ordering::SeqCst) & 1) as usize
    }

    fn passes_in(&self, bucket: usize) -> usize {
        self.inner.in_flight[bucket].load(Ordering::SeqCst)
    }
}

/// Keeps a reader registered on its clock
#[derive(Debug)]
pub struct ReaderRegistration {
    clock: ReaderClock,
}

impl ReaderRegistration {
    pub fn clock(&self) -> &ReaderClock {
        &self.clock
    }
}

impl Drop for ReaderRegistration {
    fn drop(&mut self) {
        self.clock.inner.attached.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One realtime traversal pass
#[derive(Debug)]
pub struct ReaderPass<'a> {
    clock: &'a ReaderClock,
    bucket: usize,
}

impl Drop for ReaderPass<'_> {
    fn drop(&mut self) {
        let state = &self.clock.inner;
        state.completed.fetch_add(1, Ordering::SeqCst);
        state.in_flight[self.bucket].fetch_sub(1, Ordering::SeqCst);
    }
}

/// Control-side bookkeeping of the last grace mark
#[derive(Debug, Default)]
pub struct GraceTracker {
    /// Bucket of the epoch closed by the last mark
    closed: Option<usize>,
}

impl GraceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once every pass that was running at the last mark has finished,
    /// or when no reader is attached at all.
    pub fn elapsed(&self, clock: &ReaderClock) -> bool {
        clock.attached_readers() == 0
            || self
                .closed
                .is_none_or(|bucket| clock.passes_in(bucket) == 0)
    }

    /// Record a new mark. Call right after confirming a batch, and only once
    /// `elapsed()` has returned true for the previous mark.
    pub fn mark(&mut self, clock: &ReaderClock) {
        self.closed = Some(clock.close_epoch());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_reader_means_grace_elapsed() {
        let clock = ReaderClock::new();
        let mut grace = GraceTracker::new();
        grace.mark(&clock);
        assert!(grace.elapsed(&clock));
    }

    #[test]
    fn test_pass_in_flight_blocks_grace() {
        let clock = ReaderClock::new();
        let _reader = clock.attach();
        let mut grace = GraceTracker::new();

        let pass = clock.begin_pass();
        grace.mark(&clock);
        assert!(!grace.elapsed(&clock));

        drop(pass);
        assert!(grace.elapsed(&clock));
    }

    #[test]
    fn test_idle_attached_reader_does_not_block() {
        let clock = ReaderClock::new();
        let _reader = clock.attach();
        let mut grace = GraceTracker::new();

        for _ in 0..3 {
            let _pass = clock.begin_pass();
        }
        grace.mark(&clock);
        assert!(grace.elapsed(&clock));
    }

    #[test]
    fn test_other_reader_passes_do_not_end_grace() {
        let clock = ReaderClock::new();
        let _slow = clock.attach();
        let _fast = clock.attach();
        let mut grace = GraceTracker::new();

        let slow_pass = clock.begin_pass();
        grace.mark(&clock);
        for _ in 0..5 {
            let _fast_pass = clock.begin_pass();
        }
        assert!(clock.completed_passes() >= 5);
        assert!(!grace.elapsed(&clock));

        drop(slow_pass);
        assert!(grace.elapsed(&clock));
    }

    #[test]
    fn test_passes_after_mark_do_not_block() {
        let clock = ReaderClock::new();
        let _reader = clock.attach();
        let mut grace = GraceTracker::new();

        grace.mark(&clock);
        let _later = clock.begin_pass();
        assert!(grace.elapsed(&clock));

        // The next mark waits for it
        grace.mark(&clock);
        assert!(!grace.elapsed(&clock));
    }

    #[test]
    fn test_registration_drop_detaches() {
        let clock = ReaderClock::new();
        let reader = clock.attach();
        assert_eq!(clock.attached_readers(), 1);
        drop(reader);
        assert_eq!(clock.attached_readers(), 0);
    }
}
