//! Single-threaded cooperative event loop for the exhibition host.
//!
//! The loop models the handful of browser services the sketches and monitors
//! rely on:
//!
//! ```text
//!   run_frame(now)
//!      │
//!      ├─▶ animation-frame callbacks queued before this turn (FIFO)
//!      ├─▶ interval timers whose deadline has passed (at most once each)
//!      └─▶ load observers registered after the load event fired
//! ```
//!
//! Input listeners run synchronously from [`EventLoop::dispatch`]. Every
//! callback is taken out of the loop before it runs, so callbacks may request
//! frames, cancel them, clear intervals or remove listeners re-entrantly. All
//! cancellation entry points are idempotent.

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace};

type FrameCallback = Box<dyn FnOnce(Duration)>;
type IntervalCallback = Box<dyn FnMut(Duration)>;
type ListenerCallback = Rc<RefCell<dyn FnMut(&InputEvent)>>;
type LoadCallback = Box<dyn FnOnce(Duration)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameRequestId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntervalId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Input delivered to listeners bound on the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    PointerMoved { x: f32, y: f32 },
    Resized { width: u32, height: u32 },
    Scrolled { offset: f32 },
    KeyPressed { key: char },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    PointerMoved,
    Resized,
    Scrolled,
    KeyPressed,
}

impl InputEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InputEvent::PointerMoved { .. } => EventKind::PointerMoved,
            InputEvent::Resized { .. } => EventKind::Resized,
            InputEvent::Scrolled { .. } => EventKind::Scrolled,
            InputEvent::KeyPressed { .. } => EventKind::KeyPressed,
        }
    }
}

struct IntervalEntry {
    period: Duration,
    next_due: Duration,
    // `None` while the callback is running.
    callback: Option<IntervalCallback>,
}

struct ListenerEntry {
    kind: EventKind,
    callback: ListenerCallback,
}

enum LoadState {
    Pending(Vec<LoadCallback>),
    Fired { at: Duration, late: Vec<LoadCallback> },
}

struct LoopState {
    next_id: u64,
    frames: BTreeMap<FrameRequestId, FrameCallback>,
    intervals: BTreeMap<IntervalId, IntervalEntry>,
    listeners: BTreeMap<ListenerId, ListenerEntry>,
    load: LoadState,
    turns: u64,
}

impl LoopState {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// The cooperative event loop. Share it as `Rc<EventLoop>`.
pub struct EventLoop {
    clock: Rc<dyn Clock>,
    state: RefCell<LoopState>,
}

impl EventLoop {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RefCell::new(LoopState {
                next_id: 0,
                frames: BTreeMap::new(),
                intervals: BTreeMap::new(),
                listeners: BTreeMap::new(),
                load: LoadState::Pending(Vec::new()),
                turns: 0,
            }),
        }
    }

    pub fn with_system_clock() -> Rc<Self> {
        Rc::new(Self::new(Rc::new(SystemClock::new())))
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn clock(&self) -> &Rc<dyn Clock> {
        &self.clock
    }

    /// Schedules `callback` for the next frame. Requests made while a frame is
    /// running land in the frame after it.
    pub fn request_animation_frame(
        &self,
        callback: impl FnOnce(Duration) + 'static,
    ) -> FrameRequestId {
        let mut state = self.state.borrow_mut();
        let id = FrameRequestId(state.allocate());
        state.frames.insert(id, Box::new(callback));
        id
    }

    /// Drops a pending frame request. Unknown or already-run ids are ignored.
    pub fn cancel_animation_frame(&self, id: FrameRequestId) {
        let removed = self.state.borrow_mut().frames.remove(&id);
        drop(removed);
    }

    /// Registers a repeating timer; the first tick is due one `period` from now.
    pub fn set_interval(
        &self,
        period: Duration,
        callback: impl FnMut(Duration) + 'static,
    ) -> IntervalId {
        let next_due = self.clock.now() + period;
        let mut state = self.state.borrow_mut();
        let id = IntervalId(state.allocate());
        state.intervals.insert(
            id,
            IntervalEntry {
                period,
                next_due,
                callback: Some(Box::new(callback)),
            },
        );
        trace!(?id, ?period, "interval registered");
        id
    }

    /// Stops a timer. Safe to call repeatedly and from inside the timer itself.
    pub fn clear_interval(&self, id: IntervalId) {
        let removed = self.state.borrow_mut().intervals.remove(&id);
        if removed.is_some() {
            trace!(?id, "interval cleared");
        }
    }

    pub fn add_listener(
        &self,
        kind: EventKind,
        callback: impl FnMut(&InputEvent) + 'static,
    ) -> ListenerId {
        let mut state = self.state.borrow_mut();
        let id = ListenerId(state.allocate());
        state.listeners.insert(
            id,
            ListenerEntry {
                kind,
                callback: Rc::new(RefCell::new(callback)),
            },
        );
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        let removed = self.state.borrow_mut().listeners.remove(&id);
        drop(removed);
    }

    /// Delivers `event` to every listener bound to its kind, in registration
    /// order. A listener removed by an earlier listener in the same dispatch is
    /// skipped. Returns the number of listeners invoked.
    pub fn dispatch(&self, event: InputEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<(ListenerId, ListenerCallback)> = self
            .state
            .borrow()
            .listeners
            .iter()
            .filter(|(_, entry)| entry.kind == kind)
            .map(|(id, entry)| (*id, Rc::clone(&entry.callback)))
            .collect();

        let mut delivered = 0;
        for (id, callback) in targets {
            if !self.state.borrow().listeners.contains_key(&id) {
                continue;
            }
            // A listener that dispatches its own kind again is not re-entered.
            let Ok(mut guard) = callback.try_borrow_mut() else {
                continue;
            };
            (&mut *guard)(&event);
            delivered += 1;
        }
        delivered
    }

    /// Observes the one-shot load event. Observers added after the event has
    /// fired run on the next turn with the original load timestamp.
    pub fn on_load(&self, callback: impl FnOnce(Duration) + 'static) {
        let mut state = self.state.borrow_mut();
        match &mut state.load {
            LoadState::Pending(observers) => observers.push(Box::new(callback)),
            LoadState::Fired { late, .. } => late.push(Box::new(callback)),
        }
    }

    /// Fires the load event. Returns `false` if it had already fired.
    pub fn dispatch_load(&self) -> bool {
        let now = self.clock.now();
        let observers = {
            let mut state = self.state.borrow_mut();
            match &mut state.load {
                LoadState::Fired { .. } => return false,
                LoadState::Pending(observers) => {
                    let observers = std::mem::take(observers);
                    state.load = LoadState::Fired {
                        at: now,
                        late: Vec::new(),
                    };
                    observers
                }
            }
        };
        debug!(
            observers = observers.len(),
            at_ms = now.as_secs_f64() * 1000.0,
            "load event dispatched"
        );
        for observer in observers {
            observer(now);
        }
        true
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state.borrow().load, LoadState::Fired { .. })
    }

    /// Runs a single turn of the loop against the current clock.
    pub fn run_frame(&self) {
        let now = self.clock.now();
        self.state.borrow_mut().turns += 1;

        let queued: Vec<FrameRequestId> = self.state.borrow().frames.keys().copied().collect();
        for id in queued {
            let callback = self.state.borrow_mut().frames.remove(&id);
            if let Some(callback) = callback {
                callback(now);
            }
        }

        let due: Vec<IntervalId> = self
            .state
            .borrow()
            .intervals
            .iter()
            .filter(|(_, entry)| entry.next_due <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            self.fire_interval(id, now);
        }

        let late = {
            let mut state = self.state.borrow_mut();
            match &mut state.load {
                LoadState::Fired { at, late } if !late.is_empty() => {
                    Some((*at, std::mem::take(late)))
                }
                _ => None,
            }
        };
        if let Some((at, observers)) = late {
            for observer in observers {
                observer(at);
            }
        }
    }

    fn fire_interval(&self, id: IntervalId, now: Duration) {
        let callback = {
            let mut state = self.state.borrow_mut();
            match state.intervals.get_mut(&id) {
                Some(entry) => {
                    entry.next_due += entry.period;
                    if entry.next_due <= now {
                        // Missed ticks are dropped rather than replayed.
                        entry.next_due = now + entry.period;
                    }
                    entry.callback.take()
                }
                None => None,
            }
        };
        let Some(mut callback) = callback else {
            return;
        };
        callback(now);
        if let Some(entry) = self.state.borrow_mut().intervals.get_mut(&id) {
            entry.callback = Some(callback);
        }
    }

    /// Drives turns every `frame_period` until `duration` has elapsed on the
    /// loop's clock. Returns the number of turns run.
    pub fn run_for(&self, duration: Duration, frame_period: Duration) -> u64 {
        let deadline = self.clock.now() + duration;
        let mut turns = 0;
        loop {
            self.run_frame();
            turns += 1;
            let now = self.clock.now();
            if now >= deadline {
                break;
            }
            self.clock.sleep(frame_period.min(deadline - now));
        }
        turns
    }

    pub fn pending_frames(&self) -> usize {
        self.state.borrow().frames.len()
    }

    pub fn active_intervals(&self) -> usize {
        self.state.borrow().intervals.len()
    }

    pub fn listeners(&self) -> usize {
        self.state.borrow().listeners.len()
    }

    pub fn turns(&self) -> u64 {
        self.state.borrow().turns
    }
}
