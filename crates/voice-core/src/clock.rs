//! Data-plane time source
//!
//! The uplink deadline is an absolute timestamp on this clock. Tests swap in
//! [`ManualClock`] to step time by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic microsecond clock read by the data plane
pub trait Clock: Send {
    fn now_usec(&self) -> u64;
}

/// Wall-clock time since construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_usec(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

/// Clock advanced explicitly; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_usec: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_usec)),
        }
    }

    pub fn set(&self, usec: u64) {
        self.now.store(usec, Ordering::Release);
    }

    pub fn advance(&self, usec: u64) {
        self.now.fetch_add(usec, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_usec(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
