use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use scheduler::{EventLoop, FrameRequestId};
use tracing::debug;

use crate::PerformanceMonitor;

const WINDOW: Duration = Duration::from_secs(1);

struct FpsState {
    event_loop: Rc<EventLoop>,
    monitor: Weak<PerformanceMonitor>,
    pending: Cell<Option<FrameRequestId>>,
    stopped: Cell<bool>,
    frames: Cell<u64>,
    window_start: Cell<Duration>,
}

impl FpsState {
    fn schedule(self: &Rc<Self>) {
        if self.stopped.get() {
            return;
        }
        let weak = Rc::downgrade(self);
        let request = self.event_loop.request_animation_frame(move |timestamp| {
            if let Some(state) = weak.upgrade() {
                state.tick(timestamp);
            }
        });
        self.pending.set(Some(request));
    }

    fn tick(self: &Rc<Self>, timestamp: Duration) {
        self.pending.set(None);
        let Some(monitor) = self.monitor.upgrade() else {
            self.stopped.set(true);
            return;
        };

        let frames = self.frames.get() + 1;
        let elapsed = timestamp.saturating_sub(self.window_start.get());
        if elapsed >= WINDOW {
            let elapsed_ms = elapsed.as_nanos() as f64 / 1_000_000.0;
            let fps = (frames as f64 * 1000.0 / elapsed_ms).round();
            monitor.record("fps", fps);
            if monitor.is_development() {
                debug!(fps, "frame rate sampled");
            }
            self.frames.set(0);
            self.window_start.set(timestamp);
        } else {
            self.frames.set(frames);
        }
        self.schedule();
    }

    fn stop(&self) -> bool {
        if self.stopped.replace(true) {
            return false;
        }
        if let Some(request) = self.pending.take() {
            self.event_loop.cancel_animation_frame(request);
        }
        true
    }
}

/// Continuous frame counter publishing `fps` once per second.
///
/// The frame chain lives as long as the meter; dropping it stops counting.
pub struct FpsMeter {
    state: Rc<FpsState>,
}

impl FpsMeter {
    pub(crate) fn start(event_loop: Rc<EventLoop>, monitor: &Rc<PerformanceMonitor>) -> Self {
        let window_start = event_loop.now();
        let state = Rc::new(FpsState {
            event_loop,
            monitor: Rc::downgrade(monitor),
            pending: Cell::new(None),
            stopped: Cell::new(false),
            frames: Cell::new(0),
            window_start: Cell::new(window_start),
        });
        state.schedule();
        Self { state }
    }

    /// Cancels the frame chain. Returns `false` if already stopped.
    pub fn stop(&self) -> bool {
        self.state.stop()
    }

    pub fn is_running(&self) -> bool {
        !self.state.stopped.get()
    }
}

impl Drop for FpsMeter {
    fn drop(&mut self) {
        self.state.stop();
    }
}
