//! Completion tracking for snapshot-isolated graph views.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

/// Logical time a node is considered incomplete.
pub const INCOMPLETE: u32 = u32::MAX;

/// Tracks the logical time at which each node finished its bidirectional
/// wiring.
///
/// A slot holds [`INCOMPLETE`] until `mark_complete`; a view samples the
/// clock at creation and hides any node whose completion time is at or
/// after that sample, which keeps half-wired nodes out of concurrent
/// searches entirely. Slots are atomics so marks are lock-free; only
/// growth takes the write lock and publishes a longer array.
#[derive(Debug)]
pub struct CompletionTracker {
    logical_clock: AtomicU32,
    completion_times: RwLock<Vec<AtomicU32>>,
}

impl CompletionTracker {
    /// Creates a tracker with capacity for `initial_size` nodes.
    #[must_use]
    pub fn new(initial_size: usize) -> Self {
        let times = (0..initial_size)
            .map(|_| AtomicU32::new(INCOMPLETE))
            .collect();
        Self {
            logical_clock: AtomicU32::new(0),
            completion_times: RwLock::new(times),
        }
    }

    /// Records that `node` finished wiring, stamping the next clock tick.
    pub fn mark_complete(&self, node: u32) {
        let stamp = self.logical_clock.fetch_add(1, Ordering::AcqRel);
        self.ensure_capacity(node);
        let times = self.completion_times.read();
        times[node as usize].store(stamp, Ordering::Release);
    }

    /// Current value of the logical clock.
    #[must_use]
    pub fn clock(&self) -> u32 {
        self.logical_clock.load(Ordering::Acquire)
    }

    /// The time `node` completed, or [`INCOMPLETE`].
    #[must_use]
    pub fn completed_at(&self, node: u32) -> u32 {
        let times = self.completion_times.read();
        match times.get(node as usize) {
            Some(slot) => slot.load(Ordering::Acquire),
            None => INCOMPLETE,
        }
    }

    fn ensure_capacity(&self, node: u32) {
        {
            let times = self.completion_times.read();
            if (node as usize) < times.len() {
                return;
            }
        }
        let mut times = self.completion_times.write();
        if (node as usize) < times.len() {
            return;
        }
        let target = (node as usize + 1) * 2;
        while times.len() < target {
            times.push(AtomicU32::new(INCOMPLETE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_until_marked() {
        let tracker = CompletionTracker::new(4);
        assert_eq!(tracker.completed_at(0), INCOMPLETE);

        tracker.mark_complete(0);
        assert_eq!(tracker.completed_at(0), 0);
        assert_eq!(tracker.clock(), 1);
    }

    #[test]
    fn test_snapshot_fences_later_completions() {
        let tracker = CompletionTracker::new(4);
        tracker.mark_complete(0);

        let snapshot = tracker.clock();
        tracker.mark_complete(1);

        assert!(tracker.completed_at(0) < snapshot);
        assert!(tracker.completed_at(1) >= snapshot);
    }

    #[test]
    fn test_grows_past_initial_capacity() {
        let tracker = CompletionTracker::new(1);
        assert_eq!(tracker.completed_at(500), INCOMPLETE);
        tracker.mark_complete(500);
        assert_eq!(tracker.completed_at(500), 0);
        // existing slots survive the growth
        assert_eq!(tracker.completed_at(0), INCOMPLETE);
    }

    #[test]
    fn test_concurrent_marks_get_distinct_stamps() {
        use std::sync::Arc;
        let tracker = Arc::new(CompletionTracker::new(0));
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        tracker.mark_complete(t * 100 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.clock(), 400);
        let mut stamps: Vec<u32> = (0..400).map(|n| tracker.completed_at(n)).collect();
        stamps.sort_unstable();
        stamps.dedup();
        assert_eq!(stamps.len(), 400);
    }
}
