use std::cell::Cell;
use std::time::{Duration, Instant};

/// Monotonic time source for the event loop.
///
/// Timestamps are offsets from the clock's origin, mirroring the
/// `performance.now()` style the sketches and monitors are written against.
/// Nothing here assumes wall-clock accuracy beyond monotonicity.
pub trait Clock {
    fn now(&self) -> Duration;

    /// Waits until `period` has passed. The system clock blocks the thread, a
    /// manual clock simply moves forward.
    fn sleep(&self, period: Duration);
}

/// Real clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, period: Duration) {
        if !period.is_zero() {
            std::thread::sleep(period);
        }
    }
}

/// Hand-driven clock for tests and deterministic replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now: Duration) -> Self {
        Self {
            now: Cell::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Moves the clock to `to`. Going backwards is ignored to keep time monotonic.
    pub fn set(&self, to: Duration) {
        if to > self.now.get() {
            self.now.set(to);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, period: Duration) {
        self.advance(period);
    }
}
