//! Bounded producer/consumer frame queue.
//!
//! `BoundedFrameQueue` sits between the capture thread and the pipeline loop:
//! - Capacity is fixed at construction (default 5 frames)
//! - A put on a full queue evicts the oldest frame, never the newest
//! - A get blocks up to a timeout and returns `None` when nothing arrived
//!
//! Memory stays bounded under a stalled consumer at the cost of dropping the
//! oldest buffered frames.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::frame::Frame;

pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

/// What happened to the queue on `put`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Accepted,
    /// The queue was full; the oldest frame was discarded to admit this one.
    DroppedOldest,
}

struct QueueState {
    entries: VecDeque<Frame>,
    dropped_total: u64,
}

pub struct BoundedFrameQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl BoundedFrameQueue {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("frame queue capacity must be at least 1"));
        }
        Ok(Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::with_capacity(capacity),
                dropped_total: 0,
            }),
            available: Condvar::new(),
            capacity,
        })
    }

    /// Append a frame, evicting the oldest entry when full.
    ///
    /// Only the internal lock is ever waited on; the critical section is O(1).
    pub fn put(&self, frame: Frame) -> PutOutcome {
        let mut state = self.lock();
        let mut outcome = PutOutcome::Accepted;
        while state.entries.len() >= self.capacity {
            state.entries.pop_front();
            state.dropped_total += 1;
            outcome = PutOutcome::DroppedOldest;
        }
        state.entries.push_back(frame);
        drop(state);
        self.available.notify_one();
        outcome
    }

    /// Pop the oldest frame, waiting up to `timeout`. `None` means the wait
    /// expired with the queue still empty.
    pub fn get(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.entries.pop_front() {
                return Some(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _timeout) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Remove and return everything still buffered, oldest first.
    pub fn drain(&self) -> Vec<Frame> {
        self.lock().entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames evicted by overflow since construction.
    pub fn dropped_total(&self) -> u64 {
        self.lock().dropped_total
    }

    // A panicking holder cannot leave the deque half-updated, so a poisoned
    // lock is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// 1x1 frame whose single red sample tags it.
    fn tagged_frame(tag: u8) -> Frame {
        Frame::new(vec![tag, 0, 0], 1, 1).unwrap()
    }

    fn tag(frame: &Frame) -> u8 {
        frame.pixels()[0]
    }

    #[test]
    fn queue_rejects_zero_capacity() {
        assert!(BoundedFrameQueue::new(0).is_err());
    }

    #[test]
    fn queue_never_exceeds_capacity() {
        let queue = BoundedFrameQueue::new(3).unwrap();
        for i in 0..20u8 {
            queue.put(tagged_frame(i));
            assert!(queue.len() <= 3);
        }
        assert_eq!(queue.dropped_total(), 17);
    }

    #[test]
    fn queue_drops_oldest_on_overflow() {
        let queue = BoundedFrameQueue::new(DEFAULT_QUEUE_CAPACITY).unwrap();
        let outcomes: Vec<PutOutcome> = (1..=7u8).map(|i| queue.put(tagged_frame(i))).collect();

        assert!(outcomes[..5].iter().all(|o| *o == PutOutcome::Accepted));
        assert_eq!(outcomes[5], PutOutcome::DroppedOldest);
        assert_eq!(outcomes[6], PutOutcome::DroppedOldest);

        let retained: Vec<u8> = queue.drain().iter().map(tag).collect();
        assert_eq!(retained, vec![3, 4, 5, 6, 7]);
        assert!(queue.is_empty());
    }

    #[test]
    fn queue_get_times_out_when_empty() {
        let queue = BoundedFrameQueue::new(2).unwrap();
        let started = Instant::now();
        assert!(queue.get(Duration::from_millis(30)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn queue_get_wakes_on_put_from_other_thread() {
        let queue = Arc::new(BoundedFrameQueue::new(2).unwrap());
        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                queue.put(tagged_frame(42));
            })
        };

        let frame = queue.get(Duration::from_secs(2)).expect("frame from producer");
        assert_eq!(tag(&frame), 42);
        producer.join().unwrap();
    }

    #[test]
    fn queue_preserves_fifo_order() {
        let queue = BoundedFrameQueue::new(4).unwrap();
        for i in 0..4u8 {
            queue.put(tagged_frame(i));
        }
        for i in 0..4u8 {
            let frame = queue.get(Duration::from_millis(1)).unwrap();
            assert_eq!(tag(&frame), i);
        }
    }
}
