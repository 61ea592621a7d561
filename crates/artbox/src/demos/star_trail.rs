use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sketches::{Frame, Sketch, SketchContext};
use tracing::trace;

const HISTORY_WINDOW_MS: f64 = 500.0;
const CONSTELLATION_LIFESPAN_MS: f64 = 3000.0;
const MAX_AMBIENT_STARS: usize = 20;
const LINK_DISTANCE: f32 = 100.0;

#[derive(Debug, Clone)]
struct Star {
    x: f32,
    y: f32,
    max_alpha: f32,
    alpha: f32,
    born_ms: f64,
    lifespan_ms: f64,
    twinkle_offset: f32,
}

impl Star {
    fn new(rng: &mut StdRng, x: f32, y: f32, now_ms: f64) -> Self {
        let max_alpha = rng.gen_range(150.0..255.0);
        Self {
            x: x + rng.gen_range(-15.0..15.0),
            y: y + rng.gen_range(-15.0..15.0),
            max_alpha,
            alpha: max_alpha,
            born_ms: now_ms,
            lifespan_ms: rng.gen_range(2000.0..4000.0),
            twinkle_offset: rng.gen_range(0.0..std::f32::consts::TAU),
        }
    }

    fn update(&mut self, now_ms: f64, frame: u64) {
        let life = ((now_ms - self.born_ms) / self.lifespan_ms) as f32;
        self.alpha = if life < 0.1 {
            self.max_alpha * (life / 0.1)
        } else if life > 0.7 {
            self.max_alpha * (1.0 - (life - 0.7) / 0.3).max(0.0)
        } else {
            let twinkle = (frame as f32 * 0.05 + self.twinkle_offset).sin();
            self.max_alpha * (0.7 + 0.3 * twinkle)
        };
    }

    fn is_dead(&self, now_ms: f64) -> bool {
        now_ms - self.born_ms > self.lifespan_ms
    }
}

#[derive(Debug, Clone)]
struct Constellation {
    stars: Vec<Star>,
    links: Vec<(usize, usize)>,
    born_ms: f64,
}

impl Constellation {
    fn new(rng: &mut StdRng, points: &[(f32, f32)], now_ms: f64) -> Self {
        let stars: Vec<Star> = points
            .iter()
            .map(|&(x, y)| Star::new(rng, x, y, now_ms))
            .collect();
        let mut links = Vec::new();
        for i in 0..stars.len() {
            for j in i + 1..stars.len() {
                let distance = (stars[i].x - stars[j].x).hypot(stars[i].y - stars[j].y);
                if distance < LINK_DISTANCE && rng.gen_bool(0.4) {
                    links.push((i, j));
                }
            }
        }
        Self {
            stars,
            links,
            born_ms: now_ms,
        }
    }

    fn is_dead(&self, now_ms: f64) -> bool {
        now_ms - self.born_ms > CONSTELLATION_LIFESPAN_MS
    }
}

/// Pointer movement leaves short-lived constellations; ambient stars appear
/// every couple of seconds.
pub struct StarTrail {
    rng: StdRng,
    history: Vec<(f32, f32, f64)>,
    constellations: Vec<Constellation>,
    stars: Vec<Star>,
}

impl StarTrail {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            history: Vec::new(),
            constellations: Vec::new(),
            stars: Vec::new(),
        }
    }
}

impl Default for StarTrail {
    fn default() -> Self {
        Self::new()
    }
}

impl Sketch for StarTrail {
    fn draw(&mut self, ctx: &mut SketchContext, frame: &Frame) {
        let now = ctx.millis();
        if let Some((x, y)) = ctx.pointer() {
            if x > 0.0 && y > 0.0 {
                self.history.push((x, y, now));
            }
        }
        self.history.retain(|&(_, _, at)| now - at < HISTORY_WINDOW_MS);

        if self.history.len() > 3 && frame.index % 10 == 0 {
            let recent: Vec<(f32, f32)> = self
                .history
                .iter()
                .rev()
                .take(8)
                .map(|&(x, y, _)| (x, y))
                .collect();
            let constellation = Constellation::new(&mut self.rng, &recent, now);
            trace!(stars = constellation.stars.len(), links = constellation.links.len(), "constellation born");
            self.constellations.push(constellation);
        }

        for constellation in &mut self.constellations {
            for star in &mut constellation.stars {
                star.update(now, frame.index);
            }
        }
        self.constellations.retain(|c| !c.is_dead(now));

        for star in &mut self.stars {
            star.update(now, frame.index);
        }
        self.stars.retain(|s| !s.is_dead(now));

        if frame.index % 120 == 0 && self.stars.len() < MAX_AMBIENT_STARS {
            let x = self.rng.gen_range(0.0..ctx.width().max(1) as f32);
            let y = self.rng.gen_range(0.0..ctx.height().max(1) as f32);
            self.stars.push(Star::new(&mut self.rng, x, y, now));
        }

        if frame.index % 60 == 0 {
            let brightest = self
                .constellations
                .iter()
                .flat_map(|c| c.stars.iter())
                .chain(self.stars.iter())
                .map(|s| s.alpha)
                .fold(0.0_f32, f32::max);
            trace!(
                constellations = self.constellations.len(),
                ambient = self.stars.len(),
                brightest,
                "star trail"
            );
        }
    }

    fn teardown(&mut self) {
        self.history.clear();
        self.constellations.clear();
        self.stars.clear();
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
    fn star_fades_in_then_out() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut star = Star::new(&mut rng, 10.0, 10.0, 0.0);
        star.update(star.lifespan_ms * 0.05, 0);
        assert!(star.alpha < star.max_alpha * 0.6);
        star.update(star.lifespan_ms * 0.99, 0);
        assert!(star.alpha < star.max_alpha * 0.1);
        assert!(star.is_dead(star.lifespan_ms + 1.0));
    }

    #[test]
    fn pointer_sweep_runs_until_removed() {
        let clock = Rc::new(ManualClock::new());
        let event_loop = Rc::new(EventLoop::new(clock.clone()));
        let registry = SketchRegistry::new(event_loop.clone());
        let trail = StarTrail::with_rng(StdRng::seed_from_u64(1));
        registry.create("trail", Box::new(trail), Container::new("c", 640, 480));

        for step in 0..20 {
            event_loop.dispatch(InputEvent::PointerMoved {
                x: 100.0 + step as f32 * 5.0,
                y: 200.0,
            });
            clock.advance(Duration::from_millis(16));
            event_loop.run_frame();
        }
        let handle = registry.get("trail").expect("mounted");
        assert_eq!(handle.frame_count(), 20);
        assert!(registry.remove("trail"));
    }
}
