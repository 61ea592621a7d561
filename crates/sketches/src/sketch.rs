use std::time::Duration;

use scheduler::{EventKind, InputEvent};

/// Drawing element a sketch is mounted into.
///
/// The host owns the element; the registry only records which one an
/// instance is bound to and tracks its size through resize events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    id: String,
    width: u32,
    height: u32,
}

impl Container {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Timing of one animation frame delivered to [`Sketch::draw`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// 1-based frame number since the instance started.
    pub index: u64,
    /// Loop timestamp of this frame.
    pub timestamp: Duration,
    /// Time since the previous frame (zero for the first).
    pub delta: Duration,
}

/// Per-instance state handed to every sketch hook.
#[derive(Debug, Clone)]
pub struct SketchContext {
    container: Container,
    started_at: Duration,
    frame_count: u64,
    elapsed: Duration,
    pointer: Option<(f32, f32)>,
    looping: bool,
}

impl SketchContext {
    pub(crate) fn new(container: Container, started_at: Duration) -> Self {
        Self {
            container,
            started_at,
            frame_count: 0,
            elapsed: Duration::ZERO,
            pointer: None,
            looping: true,
        }
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn width(&self) -> u32 {
        self.container.width
    }

    pub fn height(&self) -> u32 {
        self.container.height
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Milliseconds since the instance started, as of the current frame.
    pub fn millis(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }

    /// Last pointer position seen by this instance, if any.
    pub fn pointer(&self) -> Option<(f32, f32)> {
        self.pointer
    }

    /// Stops the frame chain after the current frame.
    pub fn no_loop(&mut self) {
        self.looping = false;
    }

    /// Restarts the frame chain after a `no_loop`.
    pub fn loop_again(&mut self) {
        self.looping = true;
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub(crate) fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub(crate) fn begin_frame(&mut self, timestamp: Duration) -> u64 {
        self.frame_count += 1;
        self.elapsed = timestamp.saturating_sub(self.started_at);
        self.frame_count
    }

    pub(crate) fn observe(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::PointerMoved { x, y } => self.pointer = Some((x, y)),
            InputEvent::Resized { width, height } => {
                self.container.width = width;
                self.container.height = height;
            }
            InputEvent::Scrolled { .. } | InputEvent::KeyPressed { .. } => {}
        }
    }
}

/// A sketch definition: the behaviour an instance runs.
pub trait Sketch {
    /// Runs once when the instance starts, before the first frame.
    fn setup(&mut self, _ctx: &mut SketchContext) {}

    fn draw(&mut self, ctx: &mut SketchContext, frame: &Frame);

    /// Input routed from the listeners bound for [`Sketch::listens_to`].
    fn event(&mut self, _ctx: &mut SketchContext, _event: &InputEvent) {}

    /// Runs exactly once when the instance is removed.
    fn teardown(&mut self) {}

    fn listens_to(&self) -> &[EventKind] {
        &[EventKind::PointerMoved, EventKind::Resized]
    }
}
