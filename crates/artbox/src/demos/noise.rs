use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scheduler::EventKind;
use sketches::{Frame, Sketch, SketchContext};
use tracing::trace;

use super::value_noise;

const PARTICLES: usize = 30;
const MAX_GLITCH_LINES: usize = 15;
const CELL: u32 = 20;
const CELL_THRESHOLD: f32 = 0.6;
const GLITCH_DECAY: f32 = 0.98;
const GLITCH_MIN_ALPHA: f32 = 10.0;

#[derive(Debug, Clone)]
struct Particle {
    base: (f32, f32),
    pos: (f32, f32),
    size: f32,
    alpha: f32,
    noise_offset: f32,
}

impl Particle {
    fn new(rng: &mut StdRng, width: f32, height: f32) -> Self {
        let base = (rng.gen_range(0.0..width), rng.gen_range(0.0..height));
        Self {
            base,
            pos: base,
            size: rng.gen_range(1.0..3.0),
            alpha: rng.gen_range(50.0..150.0),
            noise_offset: rng.gen_range(0.0..1000.0),
        }
    }

    fn update(&mut self, frame: u64) {
        let t = frame as f32 * 0.01;
        self.pos = (
            self.base.0 + value_noise(self.noise_offset, t) * 20.0 - 10.0,
            self.base.1 + value_noise(self.noise_offset + 1000.0, t) * 20.0 - 10.0,
        );
        self.noise_offset += 0.01;
    }
}

#[derive(Debug, Clone)]
struct GlitchLine {
    x: f32,
    y: f32,
    length: f32,
    angle: f32,
    alpha: f32,
    speed: f32,
}

impl GlitchLine {
    fn new(rng: &mut StdRng, width: f32, height: f32) -> Self {
        Self {
            x: rng.gen_range(0.0..width),
            y: rng.gen_range(0.0..height),
            length: rng.gen_range(20.0..60.0),
            angle: rng.gen_range(0.0..std::f32::consts::TAU),
            alpha: rng.gen_range(100.0..200.0),
            speed: rng.gen_range(0.02..0.08),
        }
    }

    fn update(&mut self, frame: u64) {
        self.angle += self.speed;
        self.alpha *= GLITCH_DECAY;
        let shake = value_noise(frame as f32 * 0.05, 0.0) * 5.0 - 2.5;
        self.x += shake;
        self.y += shake * 0.5;
    }

    fn end(&self) -> (f32, f32) {
        (
            self.x + self.angle.cos() * self.length,
            self.y + self.angle.sin() * self.length,
        )
    }

    fn is_dead(&self) -> bool {
        self.alpha < GLITCH_MIN_ALPHA
    }
}

/// Jittering particles, decaying glitch strokes and a speckled cell grid.
pub struct NoiseOverlay {
    rng: StdRng,
    particles: Vec<Particle>,
    lines: Vec<GlitchLine>,
    lit_cells: usize,
}

impl NoiseOverlay {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            particles: Vec::new(),
            lines: Vec::new(),
            lit_cells: 0,
        }
    }

    fn count_lit_cells(width: u32, height: u32, frame: u64) -> usize {
        let t = frame as f32 * 0.005;
        let mut lit = 0;
        for x in (0..width).step_by(CELL as usize) {
            for y in (0..height).step_by(CELL as usize) {
                if value_noise(x as f32 * 0.01 + t, y as f32 * 0.01 - t) > CELL_THRESHOLD {
                    lit += 1;
                }
            }
        }
        lit
    }
}

impl Default for NoiseOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl Sketch for NoiseOverlay {
    fn setup(&mut self, ctx: &mut SketchContext) {
        let (width, height) = (ctx.width().max(1) as f32, ctx.height().max(1) as f32);
        self.particles = (0..PARTICLES)
            .map(|_| Particle::new(&mut self.rng, width, height))
            .collect();
    }

    fn draw(&mut self, ctx: &mut SketchContext, frame: &Frame) {
        self.lit_cells = Self::count_lit_cells(ctx.width(), ctx.height(), frame.index);

        for particle in &mut self.particles {
            particle.update(frame.index);
        }

        if frame.index % 5 == 0 && self.lines.len() < MAX_GLITCH_LINES {
            let (width, height) = (ctx.width().max(1) as f32, ctx.height().max(1) as f32);
            self.lines.push(GlitchLine::new(&mut self.rng, width, height));
        }
        for line in &mut self.lines {
            line.update(frame.index);
        }
        self.lines.retain(|line| !line.is_dead());

        if frame.index % 60 == 0 {
            trace!(
                lit_cells = self.lit_cells,
                lines = self.lines.len(),
                first_line = ?self.lines.first().map(GlitchLine::end),
                first_particle = ?self.particles.first().map(|p| (p.pos, p.size, p.alpha)),
                "noise overlay"
            );
        }
    }

    fn teardown(&mut self) {
        self.particles.clear();
        self.lines.clear();
        self.lit_cells = 0;
    }

    fn listens_to(&self) -> &[EventKind] {
        &[EventKind::Resized]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glitch_lines_decay_until_dead() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut line = GlitchLine::new(&mut rng, 100.0, 100.0);
        let start = line.alpha;
        line.update(1);
        assert!((line.alpha - start * GLITCH_DECAY).abs() < 1e-3);

        let mut frames = 1;
        while !line.is_dead() {
            line.update(frames);
            frames += 1;
            assert!(frames < 1_000);
        }
        // 200 * 0.98^n < 10 needs at most 149 frames.
        assert!(frames <= 150);
    }

    #[test]
    fn particles_stay_near_their_base() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut particle = Particle::new(&mut rng, 50.0, 50.0);
        for frame in 0..500 {
            particle.update(frame);
            assert!((particle.pos.0 - particle.base.0).abs() <= 10.01);
            assert!((particle.pos.1 - particle.base.1).abs() <= 10.01);
        }
    }

    #[test]
    fn lit_cells_never_exceed_the_grid() {
        for frame in [0, 10, 100] {
            assert!(NoiseOverlay::count_lit_cells(200, 100, frame) <= 10 * 5);
        }
        assert_eq!(NoiseOverlay::count_lit_cells(0, 0, 1), 0);
    }
}
