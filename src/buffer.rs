// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Zero-allocation revolution buffers.
//!
//! This module provides the pre-allocated [`ScanBuffer`] arena that the
//! capture thread fills one revolution at a time, and the [`HandoffBuffer`]
//! single-slot mailbox that passes completed revolutions to the caller.
//!
//! # Architecture
//!
//! ```text
//! capture thread                    HandoffBuffer                caller
//! ┌──────────────┐  publish (swap)  ┌──────────────┐  take (copy) ┌────────┐
//! │ ScanBuffer A │ ───────────────→ │ ScanBuffer B │ ───────────→ │ [Sample]│
//! │  (building)  │ ←─────────────── │   (latest)   │              └────────┘
//! └──────────────┘   old slot back  └──────────────┘
//! ```
//!
//! Publishing swaps the two arenas under the lock, so the builder and the
//! stored revolution never alias and no samples are copied on the producer
//! side. A revolution that is still unread when the next one is published
//! is dropped.
//!
//! # Example
//!
//! ```
//! use edgefirst_ydlidar::buffer::{HandoffBuffer, ScanBuffer};
//! use edgefirst_ydlidar::lidar::Sample;
//! use std::time::Duration;
//!
//! let handoff = HandoffBuffer::new(16);
//! let mut building = ScanBuffer::with_capacity(16);
//! building.push(Sample { angle: 100, distance: 2500, ..Default::default() });
//! handoff.publish(&mut building);
//! assert!(building.is_empty());
//!
//! let mut out = [Sample::default(); 16];
//! let taken = handoff.take(&mut out, Duration::from_millis(10)).unwrap();
//! assert_eq!(taken.len, 1);
//! assert_eq!(out[0].distance, 2500);
//! ```

use crate::lidar::Sample;
use std::{
    fmt,
    sync::{Condvar, Mutex, PoisonError},
    time::Duration,
};

/// Pre-allocated revolution arena.
///
/// Memory is allocated once at construction; `push` and `clear` never
/// allocate. When the arena is full, further samples overwrite the last
/// slot so a stream that never produces a start marker cannot grow memory.
#[derive(Debug, Clone)]
pub struct ScanBuffer {
    samples: Vec<Sample>,
    len: usize,
    /// The revolution has a defined start and may be published.
    started: bool,
    /// Host time the revolution was completed, in nanoseconds.
    stamp: u64,
}

impl ScanBuffer {
    /// Create a new buffer holding at most `capacity` samples.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: vec![Sample::default(); capacity],
            len: 0,
            started: false,
            stamp: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Add a sample, overwriting the last slot when full.
    #[inline]
    pub fn push(&mut self, sample: Sample) {
        if self.len < self.capacity() {
            self.samples[self.len] = sample;
            self.len += 1;
        } else if let Some(last) = self.samples.last_mut() {
            *last = sample;
        }
    }

    /// Reset to an empty, not started revolution.
    ///
    /// The underlying memory is not zeroed.
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
        self.started = false;
        self.stamp = 0;
    }

    /// Valid samples in order of arrival.
    #[inline]
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples[..self.len]
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Mark the revolution as started without a start marker, so it is
    /// flushed at the next boundary.
    #[inline]
    pub fn mark_started(&mut self) {
        self.started = true;
    }

    #[inline]
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    #[inline]
    pub fn set_stamp(&mut self, stamp: u64) {
        self.stamp = stamp;
    }
}

impl Default for ScanBuffer {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

/// Errors returned by [`HandoffBuffer::take`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandoffError {
    /// Nothing was published before the deadline.
    Timeout,
    /// Woken without data, the producer is stopping.
    Empty,
}

impl fmt::Display for HandoffError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HandoffError::Timeout => write!(f, "timed out waiting for a revolution"),
            HandoffError::Empty => write!(f, "no revolution available"),
        }
    }
}

impl std::error::Error for HandoffError {}

/// Result of a successful [`HandoffBuffer::take`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Taken {
    /// Number of samples copied into the caller's buffer.
    pub len: usize,
    /// Host time the revolution was published, in nanoseconds.
    pub stamp: u64,
}

#[derive(Debug)]
struct Slot {
    scan: ScanBuffer,
    signaled: bool,
}

/// Single-slot "latest wins" mailbox between the capture thread and the
/// caller.
///
/// The signal is auto-reset: each publish or wake releases at most one
/// pending `take`.
#[derive(Debug)]
pub struct HandoffBuffer {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl HandoffBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            slot: Mutex::new(Slot {
                scan: ScanBuffer::with_capacity(capacity),
                signaled: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Store `revolution` as the latest one and signal the consumer.
    ///
    /// Any unread revolution is discarded. On return `revolution` holds the
    /// previous slot contents, cleared and ready to be refilled.
    pub fn publish(&self, revolution: &mut ScanBuffer) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::swap(&mut slot.scan, revolution);
        revolution.clear();
        slot.signaled = true;
        drop(slot);
        self.ready.notify_one();
    }

    /// Signal the consumer without publishing anything.
    ///
    /// A blocked `take` returns [`HandoffError::Empty`] unless data is
    /// still stored.
    pub fn wake(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.signaled = true;
        drop(slot);
        self.ready.notify_all();
    }

    /// Wait up to `timeout` for a revolution and copy it into `out`.
    ///
    /// At most `out.len()` samples are copied; the rest of a larger
    /// revolution is dropped. The stored revolution is emptied either way.
    pub fn take(&self, out: &mut [Sample], timeout: Duration) -> Result<Taken, HandoffError> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |slot| !slot.signaled)
            .unwrap_or_else(PoisonError::into_inner);

        if !slot.signaled {
            return Err(HandoffError::Timeout);
        }
        slot.signaled = false;

        if slot.scan.is_empty() {
            return Err(HandoffError::Empty);
        }

        let len = out.len().min(slot.scan.len());
        out[..len].copy_from_slice(&slot.scan.as_slice()[..len]);
        let stamp = slot.scan.stamp();
        slot.scan.clear();

        Ok(Taken { len, stamp })
    }

    /// Drop any stored revolution and pending signal.
    pub fn reset(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.scan.clear();
        slot.signaled = false;
    }

    /// Capacity of the stored revolution.
    pub fn capacity(&self) -> usize {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .scan
            .capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Instant};

    fn sample(angle: u16) -> Sample {
        Sample {
            angle,
            distance: angle,
            ..Default::default()
        }
    }

    fn revolution(capacity: usize, angles: &[u16]) -> ScanBuffer {
        let mut buf = ScanBuffer::with_capacity(capacity);
        for &angle in angles {
            buf.push(sample(angle));
        }
        buf
    }

    #[test]
    fn test_scan_buffer_basic() {
        let mut buf = ScanBuffer::with_capacity(100);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 100);
        assert!(!buf.is_started());

        buf.push(sample(1));
        buf.push(sample(2));
        buf.mark_started();
        buf.set_stamp(42);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.as_slice()[1].angle, 2);

        buf.clear();
        assert!(buf.is_empty());
        assert!(!buf.is_started());
        assert_eq!(buf.stamp(), 0);
        assert_eq!(buf.capacity(), 100);
    }

    #[test]
    fn test_scan_buffer_overflow_overwrites_last() {
        let mut buf = revolution(3, &[1, 2, 3]);
        assert!(buf.is_full());

        buf.push(sample(4));
        buf.push(sample(5));
        assert_eq!(buf.len(), 3);
        let angles: Vec<u16> = buf.as_slice().iter().map(|s| s.angle).collect();
        assert_eq!(angles, vec![1, 2, 5]);
    }

    #[test]
    fn test_scan_buffer_zero_capacity() {
        let mut buf = ScanBuffer::default();
        buf.push(sample(1));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_latest_wins() {
        let handoff = HandoffBuffer::new(8);
        let mut a = revolution(8, &[10, 20, 30]);
        let mut b = revolution(8, &[40, 50]);

        handoff.publish(&mut a);
        handoff.publish(&mut b);

        let mut out = [Sample::default(); 8];
        let taken = handoff.take(&mut out, Duration::from_millis(10)).unwrap();
        assert_eq!(taken.len, 2);
        assert_eq!(out[0].angle, 40);
        assert_eq!(out[1].angle, 50);

        // A was dropped, nothing else is pending.
        assert_eq!(
            handoff.take(&mut out, Duration::from_millis(10)),
            Err(HandoffError::Timeout)
        );
    }

    #[test]
    fn test_publish_returns_distinct_cleared_buffer() {
        let handoff = HandoffBuffer::new(4);
        let mut building = revolution(4, &[1, 2]);
        building.mark_started();

        handoff.publish(&mut building);
        assert!(building.is_empty());
        assert!(!building.is_started());
        assert_eq!(building.capacity(), 4);
    }

    #[test]
    fn test_take_timeout_leaves_storage() {
        let handoff = HandoffBuffer::new(4);
        let mut out = [Sample::default(); 4];

        let start = Instant::now();
        assert_eq!(
            handoff.take(&mut out, Duration::from_millis(20)),
            Err(HandoffError::Timeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wake_without_data_is_empty() {
        let handoff = HandoffBuffer::new(4);
        handoff.wake();

        let mut out = [Sample::default(); 4];
        assert_eq!(
            handoff.take(&mut out, Duration::from_secs(1)),
            Err(HandoffError::Empty)
        );
    }

    #[test]
    fn test_copy_capped_by_caller_capacity() {
        let handoff = HandoffBuffer::new(8);
        let mut rev = revolution(8, &[1, 2, 3, 4, 5, 6]);
        rev.set_stamp(99);
        handoff.publish(&mut rev);

        let mut out = [Sample::default(); 4];
        let taken = handoff.take(&mut out, Duration::from_millis(10)).unwrap();
        assert_eq!(taken, Taken { len: 4, stamp: 99 });
        assert_eq!(out[3].angle, 4);
    }

    #[test]
    fn test_take_wakes_on_publish_from_other_thread() {
        let handoff = Arc::new(HandoffBuffer::new(8));
        let producer = {
            let handoff = handoff.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                let mut rev = revolution(8, &[7, 8, 9]);
                handoff.publish(&mut rev);
            })
        };

        let mut out = [Sample::default(); 8];
        let taken = handoff.take(&mut out, Duration::from_secs(5)).unwrap();
        assert_eq!(taken.len, 3);
        producer.join().unwrap();
    }

    #[test]
    fn test_reset_drops_pending() {
        let handoff = HandoffBuffer::new(4);
        let mut rev = revolution(4, &[1]);
        handoff.publish(&mut rev);
        handoff.reset();

        let mut out = [Sample::default(); 4];
        assert_eq!(
            handoff.take(&mut out, Duration::from_millis(10)),
            Err(HandoffError::Timeout)
        );
    }
}
