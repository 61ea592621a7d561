use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sketches::{Frame, Sketch, SketchContext};
use tracing::trace;

use super::value_noise;

const TRAIL_WINDOW_MS: f64 = 1000.0;
const RESIDENT_SHAPES: usize = 12;
const INITIAL_SHAPES: usize = 15;
const MAX_POINTER_SHAPES: usize = 10;

const PASTELS: [[u8; 3]; 12] = [
    [250, 248, 240],
    [255, 250, 245],
    [248, 248, 240],
    [255, 228, 225],
    [255, 218, 185],
    [255, 192, 203],
    [255, 182, 193],
    [173, 216, 230],
    [176, 224, 230],
    [230, 230, 250],
    [240, 248, 255],
    [224, 255, 255],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShapeKind {
    Circle,
    Triangle,
    Square,
    Pentagon,
    Hexagon,
}

impl ShapeKind {
    const ALL: [ShapeKind; 5] = [
        ShapeKind::Circle,
        ShapeKind::Triangle,
        ShapeKind::Square,
        ShapeKind::Pentagon,
        ShapeKind::Hexagon,
    ];
}

#[derive(Debug, Clone)]
struct Shape {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    size: f32,
    rotation: f32,
    rotation_speed: f32,
    alpha: f32,
    color: [u8; 3],
    kind: ShapeKind,
    noise_offset: f32,
    born_ms: f64,
    /// `None` for resident shapes, which never expire.
    lifespan_ms: Option<f64>,
}

impl Shape {
    fn new(rng: &mut StdRng, x: f32, y: f32, now_ms: f64, from_pointer: bool) -> Self {
        Self {
            x,
            y,
            vx: rng.gen_range(-0.5..0.5),
            vy: rng.gen_range(-0.5..0.5),
            size: rng.gen_range(20.0..60.0),
            rotation: rng.gen_range(0.0..std::f32::consts::TAU),
            rotation_speed: rng.gen_range(-0.02..0.02),
            alpha: rng.gen_range(30.0..80.0),
            color: PASTELS[rng.gen_range(0..PASTELS.len())],
            kind: ShapeKind::ALL[rng.gen_range(0..ShapeKind::ALL.len())],
            noise_offset: rng.gen_range(0.0..1000.0),
            born_ms: now_ms,
            lifespan_ms: from_pointer.then(|| rng.gen_range(3000.0..5000.0)),
        }
    }

    fn update(&mut self, now_ms: f64, frame: u64, width: f32, height: f32) {
        let t = frame as f32 * 0.005;
        self.vx = (self.vx + (value_noise(self.noise_offset, t) * 2.0 - 1.0) * 0.02).clamp(-2.0, 2.0);
        self.vy = (self.vy + (value_noise(self.noise_offset + 1000.0, t) * 2.0 - 1.0) * 0.02).clamp(-2.0, 2.0);

        if self.lifespan_ms.is_some() {
            // Pointer shapes float upwards and slow down sideways.
            self.vy -= 0.03;
            self.vx *= 0.99;
        }

        self.x += self.vx;
        self.y += self.vy;
        self.rotation += self.rotation_speed;

        if self.x < -self.size {
            self.x = width + self.size;
        } else if self.x > width + self.size {
            self.x = -self.size;
        }
        if self.y < -self.size {
            self.y = height + self.size;
        } else if self.y > height + self.size {
            self.y = -self.size;
        }

        if let Some(lifespan) = self.lifespan_ms {
            let ratio = ((now_ms - self.born_ms) / lifespan) as f32;
            if ratio > 0.7 {
                self.alpha = (80.0 * (1.0 - (ratio - 0.7) / 0.3)).max(0.0);
            }
        }

        self.noise_offset += 0.01;
    }

    fn appearance(&self) -> (ShapeKind, [u8; 4], f32) {
        let [r, g, b] = self.color;
        (self.kind, [r, g, b, self.alpha.round() as u8], self.rotation)
    }

    fn is_dead(&self, now_ms: f64) -> bool {
        self.lifespan_ms
            .is_some_and(|lifespan| now_ms - self.born_ms > lifespan)
    }
}

/// Pastel polygons drifting on value noise and wrapping at the edges.
pub struct FloatingShapes {
    rng: StdRng,
    shapes: Vec<Shape>,
    trail: Vec<(f32, f32, f64)>,
}

impl FloatingShapes {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            shapes: Vec::new(),
            trail: Vec::new(),
        }
    }

    pub fn resident_count(&self) -> usize {
        self.shapes.iter().filter(|s| s.lifespan_ms.is_none()).count()
    }

    pub fn pointer_count(&self) -> usize {
        self.shapes.len() - self.resident_count()
    }

    fn spawn_resident(&mut self, width: u32, height: u32, now_ms: f64) {
        let x = self.rng.gen_range(0.0..width.max(1) as f32);
        let y = self.rng.gen_range(0.0..height.max(1) as f32);
        let shape = Shape::new(&mut self.rng, x, y, now_ms, false);
        self.shapes.push(shape);
    }
}

impl Default for FloatingShapes {
    fn default() -> Self {
        Self::new()
    }
}

impl Sketch for FloatingShapes {
    fn setup(&mut self, ctx: &mut SketchContext) {
        for _ in 0..INITIAL_SHAPES {
            self.spawn_resident(ctx.width(), ctx.height(), 0.0);
        }
    }

    fn draw(&mut self, ctx: &mut SketchContext, frame: &Frame) {
        let now = ctx.millis();
        if let Some((x, y)) = ctx.pointer() {
            if x > 0.0 && y > 0.0 {
                self.trail.push((x, y, now));
            }
        }
        self.trail.retain(|&(_, _, at)| now - at < TRAIL_WINDOW_MS);

        if self.trail.len() > 2 && frame.index % 20 == 0 && self.pointer_count() < MAX_POINTER_SHAPES {
            if let Some(&(x, y, _)) = self.trail.last() {
                let shape = Shape::new(&mut self.rng, x, y, now, true);
                self.shapes.push(shape);
            }
        }

        let (width, height) = (ctx.width() as f32, ctx.height() as f32);
        for shape in &mut self.shapes {
            shape.update(now, frame.index, width, height);
        }
        self.shapes.retain(|s| !s.is_dead(now));

        while self.resident_count() < RESIDENT_SHAPES {
            self.spawn_resident(ctx.width(), ctx.height(), now);
        }

        if frame.index % 60 == 0 {
            trace!(
                shapes = self.shapes.len(),
                pointer = self.pointer_count(),
                lead = ?self.shapes.first().map(Shape::appearance),
                "floating shapes"
            );
        }
    }

    fn teardown(&mut self) {
        self.shapes.clear();
        self.trail.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler::{EventLoop, InputEvent, ManualClock};
    use sketches::{Container, SketchRegistry};
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn shapes_wrap_around_the_edges() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut shape = Shape::new(&mut rng, 0.0, 0.0, 0.0, false);
        shape.x = -shape.size - 1.0;
        shape.vx = 0.0;
        shape.update(0.0, 1, 100.0, 100.0);
        assert!(shape.x > 100.0);
    }

    #[test]
    fn pointer_shapes_fade_and_expire() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut shape = Shape::new(&mut rng, 50.0, 50.0, 0.0, true);
        let lifespan = shape.lifespan_ms.unwrap();
        shape.update(lifespan * 0.95, 1, 100.0, 100.0);
        assert!(shape.alpha < 20.0);
        assert!(shape.is_dead(lifespan + 1.0));
        assert!(!Shape::new(&mut rng, 0.0, 0.0, 0.0, false).is_dead(f64::MAX));
    }

    #[test]
    fn resident_population_is_maintained_while_running() {
        let clock = Rc::new(ManualClock::new());
        let event_loop = Rc::new(EventLoop::new(clock.clone()));
        let registry = SketchRegistry::new(event_loop.clone());
        registry.create(
            "shapes",
            Box::new(FloatingShapes::with_rng(StdRng::seed_from_u64(11))),
            Container::new("c", 800, 600),
        );

        for step in 0..60 {
            event_loop.dispatch(InputEvent::PointerMoved {
                x: 10.0 + step as f32,
                y: 300.0,
            });
            clock.advance(Duration::from_millis(16));
            event_loop.run_frame();
        }
        assert_eq!(registry.get("shapes").map(|h| h.frame_count()), Some(60));
        assert_eq!(registry.cleanup_all(), 1);
    }
}
