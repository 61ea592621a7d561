//! Demo sketches mounted by the host.
//!
//! The host has no pixels to put anywhere, so every sketch runs its
//! simulation (particles, trails, uniforms) and reports through tracing.

mod floating_shapes;
mod noise;
mod shader_field;
mod star_trail;

use std::fs;
use std::rc::Rc;

use anyhow::{Context, Result};
use artconfig::{ResolvedSketch, SketchKind};
use shadercache::{ContextId, ContextLease, NagaBackend, ProgramCache};
use sketches::Sketch;

pub use floating_shapes::FloatingShapes;
pub use noise::NoiseOverlay;
pub use shader_field::{ShaderField, DEFAULT_FIELD_FRAGMENT};
pub use star_trail::StarTrail;

pub type Programs = ProgramCache<Rc<NagaBackend>>;

/// Builds the sketch for one configured entry. GPU sketches acquire their
/// rendering context here and give it back from `teardown`.
pub fn build(entry: &ResolvedSketch, programs: &Rc<Programs>) -> Result<Box<dyn Sketch>> {
    let sketch: Box<dyn Sketch> = match entry.kind {
        SketchKind::ShaderField => {
            let fragment = match &entry.fragment {
                Some(path) => fs::read_to_string(path).with_context(|| {
                    format!(
                        "failed to read fragment shader {} for sketch '{}'",
                        path.display(),
                        entry.id
                    )
                })?,
                None => DEFAULT_FIELD_FRAGMENT.to_string(),
            };
            let backend = Rc::new(NagaBackend::new(entry.container.clone()));
            let lease = ContextLease::acquire(programs, ContextId::new(entry.id.clone()), backend);
            Box::new(ShaderField::new(lease, &fragment))
        }
        SketchKind::StarTrail => Box::new(StarTrail::new()),
        SketchKind::FloatingShapes => Box::new(FloatingShapes::new()),
        SketchKind::Noise => Box::new(NoiseOverlay::new()),
    };
    Ok(sketch)
}

/// Smooth 2D value noise in `[0, 1]`.
pub(crate) fn value_noise(x: f32, y: f32) -> f32 {
    fn hash(ix: i32, iy: i32) -> f32 {
        let mut h = (ix as u32).wrapping_mul(374_761_393) ^ (iy as u32).wrapping_mul(668_265_263);
        h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
        (h ^ (h >> 16)) as f32 / u32::MAX as f32
    }
    fn fade(t: f32) -> f32 {
        t * t * (3.0 - 2.0 * t)
    }

    let (x0, y0) = (x.floor(), y.floor());
    let (ix, iy) = (x0 as i32, y0 as i32);
    let (tx, ty) = (fade(x - x0), fade(y - y0));
    let top = hash(ix, iy) + (hash(ix + 1, iy) - hash(ix, iy)) * tx;
    let bottom = hash(ix, iy + 1) + (hash(ix + 1, iy + 1) - hash(ix, iy + 1)) * tx;
    top + (bottom - top) * ty
}
