//! Bounded, drop-oldest frame queue shared between the producer thread and
//! the pacer thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::frame::OwnedFrame;

/// A bounded FIFO of owned frames. All mutating operations serialize
/// through a single lock; none of them do more work than a handful of
/// moves, so lock hold time stays short.
pub struct FrameQueue {
    capacity: usize,
    frames: Mutex<VecDeque<OwnedFrame>>,
    dropped_from_overflow: AtomicU64,
    dropped_as_stale: AtomicU64,
    /// Frames dropped to overflow since the last successful dequeue;
    /// `drain_to_latest` resets this so telemetry after a drain is not
    /// skewed by overflow that happened before it.
    overflow_since_last_dequeue: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "FrameQueue capacity must be at least 1");
        Self {
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            dropped_from_overflow: AtomicU64::new(0),
            dropped_as_stale: AtomicU64::new(0),
            overflow_since_last_dequeue: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a frame. If the queue is already at capacity the oldest
    /// frame is removed and released first. Always succeeds.
    pub fn enqueue(&self, frame: OwnedFrame) {
        let mut frames = self.frames.lock();
        if frames.len() >= self.capacity {
            frames.pop_front();
            self.dropped_from_overflow.fetch_add(1, Ordering::Relaxed);
            self.overflow_since_last_dequeue
                .fetch_add(1, Ordering::Relaxed);
        }
        frames.push_back(frame);
    }

    /// Removes and returns the oldest queued frame, if any.
    pub fn try_dequeue(&self) -> Option<OwnedFrame> {
        self.frames.lock().pop_front()
    }

    /// Discards every frame but the newest, counting each discarded frame
    /// as stale, and resets the overflow-since-last-dequeue accumulator.
    pub fn drain_to_latest(&self) {
        let mut frames = self.frames.lock();
        let discarded = frames.len().saturating_sub(1);
        if discarded > 0 {
            let newest = frames.pop_back();
            frames.clear();
            if let Some(newest) = newest {
                frames.push_back(newest);
            }
            self.dropped_as_stale
                .fetch_add(discarded as u64, Ordering::Relaxed);
        }
        self.overflow_since_last_dequeue.store(0, Ordering::Relaxed);
    }

    /// Releases all queued frames without counting them as drops of any
    /// kind — used during shutdown.
    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    pub fn count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn dropped_from_overflow(&self) -> u64 {
        self.dropped_from_overflow.load(Ordering::Relaxed)
    }

    pub fn dropped_as_stale(&self) -> u64 {
        self.dropped_as_stale.load(Ordering::Relaxed)
    }

    pub fn overflow_since_last_dequeue(&self) -> u64 {
        self.overflow_since_last_dequeue.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn frame(tag: u8) -> OwnedFrame {
        let captured = crate::frame::CapturedFrame {
            pixels: &[tag; 4],
            width: 1,
            height: 1,
            stride: 4,
            captured_monotonic: Instant::now(),
            captured_wallclock_unix_nanos: 0,
            storage_kind: frame_transport::StorageKind::CpuMemory,
        };
        OwnedFrame::copy_from(&captured)
    }

    #[test]
    fn enqueue_respects_capacity_and_drops_oldest() {
        let queue = FrameQueue::new(2);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));
        queue.enqueue(frame(3));

        assert_eq!(queue.count(), 2);
        assert_eq!(queue.dropped_from_overflow(), 1);

        let first = queue.try_dequeue().unwrap();
        assert_eq!(first.pixels()[0], 2);
    }

    #[test]
    fn fifo_order_is_preserved() {
        let queue = FrameQueue::new(4);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));
        queue.enqueue(frame(3));

        assert_eq!(queue.try_dequeue().unwrap().pixels()[0], 1);
        assert_eq!(queue.try_dequeue().unwrap().pixels()[0], 2);
        assert_eq!(queue.try_dequeue().unwrap().pixels()[0], 3);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn drain_to_latest_keeps_only_newest_and_resets_overflow_accumulator() {
        let queue = FrameQueue::new(4);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));
        queue.enqueue(frame(3));
        queue.enqueue(frame(4));
        queue.enqueue(frame(5)); // one overflow drop before the drain

        assert_eq!(queue.overflow_since_last_dequeue(), 1);

        queue.drain_to_latest();

        assert_eq!(queue.count(), 1);
        assert_eq!(queue.try_dequeue().unwrap().pixels()[0], 5);
        assert_eq!(queue.dropped_as_stale(), 3);
        assert_eq!(queue.overflow_since_last_dequeue(), 0);
    }

    #[test]
    fn clear_empties_without_counting_drops() {
        let queue = FrameQueue::new(4);
        queue.enqueue(frame(1));
        queue.enqueue(frame(2));
        queue.clear();

        assert_eq!(queue.count(), 0);
        assert_eq!(queue.dropped_as_stale(), 0);
        assert_eq!(queue.dropped_from_overflow(), 0);
    }

    #[test]
    fn never_exceeds_capacity() {
        let queue = FrameQueue::new(3);
        for i in 0..50u8 {
            queue.enqueue(frame(i));
            assert!(queue.count() <= queue.capacity());
        }
    }
}
