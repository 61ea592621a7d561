use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use scheduler::{EventKind, EventLoop, FrameRequestId, InputEvent, ListenerId};
use tracing::{debug, trace};

use crate::sketch::{Container, Frame, Sketch, SketchContext};

/// Observable lifecycle of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// A frame is queued on the event loop.
    Running,
    /// Alive but not drawing (`no_loop` or paused).
    Idle,
    /// Torn down; nothing will run again.
    Removed,
}

struct InstanceInner {
    id: String,
    event_loop: Rc<EventLoop>,
    sketch: RefCell<Box<dyn Sketch>>,
    ctx: RefCell<SketchContext>,
    // Copies of the context readable while a hook holds `ctx`.
    frames: Cell<u64>,
    container: RefCell<Container>,
    // Pause or resume requested while `ctx` was borrowed by a hook.
    pending_looping: Cell<Option<bool>>,
    pending_frame: Cell<Option<FrameRequestId>>,
    listeners: RefCell<Vec<ListenerId>>,
    last_frame: Cell<Option<Duration>>,
    removed: Cell<bool>,
    torn_down: Cell<bool>,
}

impl InstanceInner {
    fn schedule_frame(self: &Rc<Self>) {
        if self.removed.get() || self.pending_frame.get().is_some() {
            return;
        }
        let weak = Rc::downgrade(self);
        let request = self.event_loop.request_animation_frame(move |timestamp| {
            if let Some(inner) = weak.upgrade() {
                inner.on_frame(timestamp);
            }
        });
        self.pending_frame.set(Some(request));
    }

    fn on_frame(self: &Rc<Self>, timestamp: Duration) {
        self.pending_frame.set(None);
        if self.removed.get() {
            return;
        }
        let delta = self
            .last_frame
            .replace(Some(timestamp))
            .map(|previous| timestamp.saturating_sub(previous))
            .unwrap_or_default();

        {
            let Ok(mut sketch) = self.sketch.try_borrow_mut() else {
                return;
            };
            let mut ctx = self.ctx.borrow_mut();
            let index = ctx.begin_frame(timestamp);
            self.frames.set(index);
            sketch.draw(
                &mut ctx,
                &Frame {
                    index,
                    timestamp,
                    delta,
                },
            );
            self.apply_pending_looping(&mut ctx);
        }

        if self.removed.get() {
            // Removed from inside its own draw; finish the deferred teardown.
            self.finish_teardown();
            return;
        }
        if self.ctx.borrow().is_looping() {
            self.schedule_frame();
        }
    }

    fn on_event(&self, event: &InputEvent) {
        if self.removed.get() {
            return;
        }
        {
            let Ok(mut sketch) = self.sketch.try_borrow_mut() else {
                return;
            };
            let mut ctx = self.ctx.borrow_mut();
            ctx.observe(event);
            *self.container.borrow_mut() = ctx.container().clone();
            sketch.event(&mut ctx, event);
            self.apply_pending_looping(&mut ctx);
        }
        if self.removed.get() {
            self.finish_teardown();
        }
    }

    fn set_looping(&self, looping: bool) {
        match self.ctx.try_borrow_mut() {
            Ok(mut ctx) => ctx.set_looping(looping),
            Err(_) => self.pending_looping.set(Some(looping)),
        }
    }

    fn apply_pending_looping(&self, ctx: &mut SketchContext) {
        if let Some(looping) = self.pending_looping.take() {
            ctx.set_looping(looping);
        }
    }

    fn remove(&self) -> bool {
        if self.removed.replace(true) {
            return false;
        }
        if let Some(request) = self.pending_frame.take() {
            self.event_loop.cancel_animation_frame(request);
        }
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        for listener in listeners {
            self.event_loop.remove_listener(listener);
        }
        self.finish_teardown();
        true
    }

    fn finish_teardown(&self) {
        if self.torn_down.get() {
            return;
        }
        // While a hook of this sketch is running the teardown is deferred to
        // the end of that hook.
        if let Ok(mut sketch) = self.sketch.try_borrow_mut() {
            self.torn_down.set(true);
            sketch.teardown();
            debug!(
                instance = %self.id,
                frames = self.frames.get(),
                "sketch instance torn down"
            );
        }
    }
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        if self.remove() {
            trace!(instance = %self.id, "sketch instance dropped without explicit removal");
        }
    }
}

/// Shared handle to a mounted sketch instance.
#[derive(Clone)]
pub struct InstanceHandle(Rc<InstanceInner>);

impl InstanceHandle {
    pub(crate) fn start(
        id: String,
        sketch: Box<dyn Sketch>,
        container: Container,
        event_loop: Rc<EventLoop>,
    ) -> Self {
        let started_at = event_loop.now();
        let inner = Rc::new(InstanceInner {
            id,
            event_loop,
            sketch: RefCell::new(sketch),
            ctx: RefCell::new(SketchContext::new(container.clone(), started_at)),
            frames: Cell::new(0),
            container: RefCell::new(container),
            pending_looping: Cell::new(None),
            pending_frame: Cell::new(None),
            listeners: RefCell::new(Vec::new()),
            last_frame: Cell::new(None),
            removed: Cell::new(false),
            torn_down: Cell::new(false),
        });

        {
            let mut sketch = inner.sketch.borrow_mut();
            let mut ctx = inner.ctx.borrow_mut();
            sketch.setup(&mut ctx);
            inner.apply_pending_looping(&mut ctx);
        }

        let kinds: Vec<EventKind> = inner.sketch.borrow().listens_to().to_vec();
        for kind in kinds {
            let weak = Rc::downgrade(&inner);
            let listener = inner.event_loop.add_listener(kind, move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_event(event);
                }
            });
            inner.listeners.borrow_mut().push(listener);
        }

        // The first frame always draws, even after `no_loop` in setup.
        inner.schedule_frame();
        debug!(
            instance = %inner.id,
            container = %inner.container.borrow().id(),
            "sketch instance started"
        );
        Self(inner)
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn state(&self) -> InstanceState {
        if self.0.removed.get() {
            InstanceState::Removed
        } else if self.0.pending_frame.get().is_some() {
            InstanceState::Running
        } else {
            InstanceState::Idle
        }
    }

    pub fn is_removed(&self) -> bool {
        self.0.removed.get()
    }

    pub fn frame_count(&self) -> u64 {
        self.0.frames.get()
    }

    pub fn container(&self) -> Container {
        self.0.container.borrow().clone()
    }

    /// Stops the render loop, unbinds listeners and runs teardown. Returns
    /// `false` if the instance was already removed.
    pub fn remove(&self) -> bool {
        self.0.remove()
    }

    /// Stops drawing after the current frame without tearing down. Safe to
    /// call from inside the instance's own hooks.
    pub fn pause(&self) {
        self.0.set_looping(false);
        if let Some(request) = self.0.pending_frame.take() {
            self.0.event_loop.cancel_animation_frame(request);
        }
    }

    pub fn resume(&self) {
        self.0.set_looping(true);
        self.0.schedule_frame();
    }

    /// Queues a single frame while the instance is idle.
    pub fn redraw(&self) {
        self.0.schedule_frame();
    }

    pub fn same_instance(&self, other: &InstanceHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("id", &self.0.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler::ManualClock;

    #[derive(Default)]
    struct Tally {
        setups: Cell<u32>,
        draws: Cell<u32>,
        events: Cell<u32>,
        teardowns: Cell<u32>,
    }

    struct CountingSketch {
        tally: Rc<Tally>,
        stop_after: Option<u64>,
    }

    impl Sketch for CountingSketch {
        fn setup(&mut self, _ctx: &mut SketchContext) {
            self.tally.setups.set(self.tally.setups.get() + 1);
        }

        fn draw(&mut self, ctx: &mut SketchContext, _frame: &Frame) {
            self.tally.draws.set(self.tally.draws.get() + 1);
            if Some(ctx.frame_count()) == self.stop_after {
                ctx.no_loop();
            }
        }

        fn event(&mut self, _ctx: &mut SketchContext, _event: &InputEvent) {
            self.tally.events.set(self.tally.events.get() + 1);
        }

        fn teardown(&mut self) {
            self.tally.teardowns.set(self.tally.teardowns.get() + 1);
        }
    }

    fn start_counting(stop_after: Option<u64>) -> (Rc<ManualClock>, Rc<EventLoop>, Rc<Tally>, InstanceHandle) {
        let clock = Rc::new(ManualClock::new());
        let event_loop = Rc::new(EventLoop::new(clock.clone()));
        let tally = Rc::new(Tally::default());
        let handle = InstanceHandle::start(
            "counting".into(),
            Box::new(CountingSketch {
                tally: tally.clone(),
                stop_after,
            }),
            Container::new("canvas", 640, 480),
            event_loop.clone(),
        );
        (clock, event_loop, tally, handle)
    }

    #[test]
    fn draws_every_frame_until_removed() {
        let (clock, event_loop, tally, handle) = start_counting(None);
        for _ in 0..3 {
            clock.advance(Duration::from_millis(16));
            event_loop.run_frame();
        }
        assert_eq!(tally.draws.get(), 3);
        assert_eq!(handle.state(), InstanceState::Running);

        assert!(handle.remove());
        assert!(!handle.remove());
        event_loop.run_frame();
        assert_eq!(tally.draws.get(), 3);
        assert_eq!(tally.teardowns.get(), 1);
        assert_eq!(event_loop.pending_frames(), 0);
        assert_eq!(event_loop.listeners(), 0);
    }

    #[test]
    fn no_loop_goes_idle_and_redraw_runs_one_frame() {
        let (_clock, event_loop, tally, handle) = start_counting(Some(2));
        for _ in 0..5 {
            event_loop.run_frame();
        }
        assert_eq!(tally.draws.get(), 2);
        assert_eq!(handle.state(), InstanceState::Idle);

        handle.redraw();
        event_loop.run_frame();
        event_loop.run_frame();
        assert_eq!(tally.draws.get(), 3);
    }

    #[test]
    fn events_update_context_and_reach_sketch() {
        let (_clock, event_loop, tally, handle) = start_counting(None);
        event_loop.dispatch(InputEvent::Resized {
            width: 1024,
            height: 768,
        });
        event_loop.dispatch(InputEvent::Scrolled { offset: 3.0 });
        assert_eq!(tally.events.get(), 1);
        assert_eq!(handle.container().size(), (1024, 768));
    }

    #[test]
    fn dropping_last_handle_tears_down() {
        let (_clock, event_loop, tally, handle) = start_counting(None);
        drop(handle);
        assert_eq!(tally.teardowns.get(), 1);
        assert_eq!(event_loop.listeners(), 0);
        event_loop.run_frame();
        assert_eq!(tally.draws.get(), 0);
    }

    struct SelfRemoving {
        slot: Rc<RefCell<Option<InstanceHandle>>>,
        tally: Rc<Tally>,
    }

    impl Sketch for SelfRemoving {
        fn draw(&mut self, _ctx: &mut SketchContext, _frame: &Frame) {
            self.tally.draws.set(self.tally.draws.get() + 1);
            if let Some(handle) = self.slot.borrow().as_ref() {
                handle.remove();
            }
            // Still inside draw: teardown must not have run yet.
            assert_eq!(self.tally.teardowns.get(), 0);
        }

        fn teardown(&mut self) {
            self.tally.teardowns.set(self.tally.teardowns.get() + 1);
        }
    }

    #[test]
    fn removal_from_inside_draw_defers_teardown() {
        let clock = Rc::new(ManualClock::new());
        let event_loop = Rc::new(EventLoop::new(clock));
        let tally = Rc::new(Tally::default());
        let slot = Rc::new(RefCell::new(None));
        let handle = InstanceHandle::start(
            "self".into(),
            Box::new(SelfRemoving {
                slot: slot.clone(),
                tally: tally.clone(),
            }),
            Container::new("canvas", 100, 100),
            event_loop.clone(),
        );
        *slot.borrow_mut() = Some(handle.clone());

        event_loop.run_frame();
        event_loop.run_frame();
        assert_eq!(tally.draws.get(), 1);
        assert_eq!(tally.teardowns.get(), 1);
        assert!(handle.is_removed());
        slot.borrow_mut().take();
    }

    /// Reads its own handle from draw and pauses itself on `pause_at`.
    struct SelfPausing {
        slot: Rc<RefCell<Option<InstanceHandle>>>,
        seen: Rc<RefCell<Vec<(u64, (u32, u32))>>>,
        pause_at: u64,
    }

    impl Sketch for SelfPausing {
        fn draw(&mut self, ctx: &mut SketchContext, _frame: &Frame) {
            if let Some(handle) = self.slot.borrow().as_ref() {
                self.seen
                    .borrow_mut()
                    .push((handle.frame_count(), handle.container().size()));
                if ctx.frame_count() == self.pause_at {
                    handle.pause();
                }
            }
        }

        fn event(&mut self, _ctx: &mut SketchContext, _event: &InputEvent) {
            if let Some(handle) = self.slot.borrow().as_ref() {
                handle.resume();
            }
        }

        fn listens_to(&self) -> &[EventKind] {
            &[EventKind::KeyPressed]
        }
    }

    fn start_self_pausing(
        pause_at: u64,
    ) -> (Rc<EventLoop>, Rc<RefCell<Vec<(u64, (u32, u32))>>>, InstanceHandle) {
        let event_loop = Rc::new(EventLoop::new(Rc::new(ManualClock::new())));
        let slot = Rc::new(RefCell::new(None));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let handle = InstanceHandle::start(
            "pausing".into(),
            Box::new(SelfPausing {
                slot: slot.clone(),
                seen: seen.clone(),
                pause_at,
            }),
            Container::new("canvas", 320, 200),
            event_loop.clone(),
        );
        *slot.borrow_mut() = Some(handle.clone());
        (event_loop, seen, handle)
    }

    #[test]
    fn handle_accessors_work_inside_draw() {
        let (event_loop, seen, handle) = start_self_pausing(u64::MAX);
        event_loop.run_frame();
        event_loop.run_frame();
        assert_eq!(*seen.borrow(), vec![(1, (320, 200)), (2, (320, 200))]);
        assert_eq!(handle.frame_count(), 2);
        handle.remove();
    }

    #[test]
    fn pause_from_inside_draw_sticks() {
        let (event_loop, seen, handle) = start_self_pausing(1);
        for _ in 0..5 {
            event_loop.run_frame();
        }
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(handle.state(), InstanceState::Idle);
        assert_eq!(event_loop.pending_frames(), 0);
        handle.remove();
    }

    #[test]
    fn resume_from_inside_an_event_hook_restarts_drawing() {
        let (event_loop, seen, handle) = start_self_pausing(1);
        event_loop.run_frame();
        event_loop.run_frame();
        assert_eq!(handle.state(), InstanceState::Idle);

        event_loop.dispatch(InputEvent::KeyPressed { key: 'r' });
        assert_eq!(handle.state(), InstanceState::Running);
        event_loop.run_frame();
        event_loop.run_frame();
        assert_eq!(seen.borrow().len(), 3);
        handle.remove();
    }
}
