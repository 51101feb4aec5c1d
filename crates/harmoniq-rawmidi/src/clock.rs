use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::MidiTimestamp;

/// Source of stream-relative time used to stamp incoming bytes.
pub trait Clock: Send {
    /// Nanoseconds elapsed since the stream epoch. Must never go backwards.
    fn now_nanos(&self) -> MidiTimestamp;
}

impl<C: Clock + ?Sized> Clock for Box<C> {
    fn now_nanos(&self) -> MidiTimestamp {
        (**self).now_nanos()
    }
}

/// Wall clock backed by [`Instant`], starting at zero when created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Create a clock whose epoch is now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Restart the clock at zero.
    pub fn reset(&mut self) {
        self.epoch = Instant::now();
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> MidiTimestamp {
        self.epoch.elapsed().as_nanos() as MidiTimestamp
    }
}

/// Manually driven clock for tests and replay.
///
/// Clones share the same time, so a byte source can move the clock forward
/// as it hands out bytes.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current time. Earlier values than the current reading are ignored.
    pub fn set(&self, nanos: MidiTimestamp) {
        self.nanos.fetch_max(nanos, Ordering::AcqRel);
    }

    /// Move the clock forward by `nanos`.
    pub fn advance(&self, nanos: u64) {
        self.nanos.fetch_add(nanos, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> MidiTimestamp {
        self.nanos.load(Ordering::Acquire)
    }
}
