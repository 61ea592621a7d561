use std::rc::Rc;

use shadercache::{wrap_sketch_fragment, ContextLease, NagaBackend, NagaProgram, FULLSCREEN_VERTEX_GLSL};
use sketches::{Frame, Sketch, SketchContext};
use tracing::{debug, trace, warn};

/// Warm gradient with a pulsing sun, rays and drifting clouds.
pub const DEFAULT_FIELD_FRAGMENT: &str = r"
precision mediump float;
uniform vec2 u_resolution;
uniform float u_time;
uniform vec2 u_mouse;
varying vec2 v_texCoord;

float hash(vec2 st) {
    return fract(sin(dot(st, vec2(12.9898, 78.233))) * 43758.5453123);
}

void main() {
    vec2 st = v_texCoord;
    float time = u_time * 0.5;

    vec3 warm = vec3(0.9, 0.7, 0.4);
    vec3 color = warm + (vec3(1.0, 0.9, 0.6) - warm) * st.y;

    vec2 anchor = vec2(0.7, 0.8);
    vec2 sun = anchor + (u_mouse / max(u_resolution, vec2(1.0)) - anchor) * 0.2;
    float dist = distance(st, sun);
    color += smoothstep(0.1, 0.05, dist) * vec3(1.0, 0.95, 0.8);

    float angle = atan(st.y - sun.y, st.x - sun.x);
    float rays = (sin(angle * 8.0 + time * 2.0) * 0.5 + 0.5) * smoothstep(0.3, 0.0, dist);
    color += rays * vec3(1.0, 0.9, 0.6) * 0.2;

    float cloud = smoothstep(0.5, 0.8, hash(floor(st * 4.0 + vec2(time * 0.1))));
    color = color + (vec3(0.9) - color) * (cloud * 0.3);

    gl_FragColor = vec4(color, 1.0);
}
";

/// Per-frame inputs the field shader reads.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FieldUniforms {
    pub time: f32,
    pub resolution: [f32; 2],
    pub mouse: [f32; 2],
}

pub struct ShaderField {
    lease: Option<ContextLease<Rc<NagaBackend>>>,
    fragment: String,
    program: Option<NagaProgram>,
    uniforms: FieldUniforms,
}

impl ShaderField {
    pub fn new(lease: ContextLease<Rc<NagaBackend>>, fragment: &str) -> Self {
        Self {
            lease: Some(lease),
            fragment: wrap_sketch_fragment(fragment),
            program: None,
            uniforms: FieldUniforms::default(),
        }
    }
}

impl Sketch for ShaderField {
    fn setup(&mut self, ctx: &mut SketchContext) {
        let Some(lease) = &self.lease else {
            return;
        };
        match lease.program(FULLSCREEN_VERTEX_GLSL, &self.fragment) {
            Ok(program) => {
                debug!(context = %lease.id(), ?program, "shader field ready");
                self.program = Some(program);
            }
            Err(err) => {
                warn!(context = %lease.id(), "shader field disabled: {err}");
                ctx.no_loop();
            }
        }
    }

    fn draw(&mut self, ctx: &mut SketchContext, frame: &Frame) {
        if self.program.is_none() {
            return;
        }
        let (mouse_x, mouse_y) = ctx.pointer().unwrap_or((0.0, 0.0));
        self.uniforms = FieldUniforms {
            time: (ctx.millis() / 1000.0) as f32,
            resolution: [ctx.width() as f32, ctx.height() as f32],
            mouse: [mouse_x, mouse_y],
        };
        if frame.index % 120 == 0 {
            trace!(frame = frame.index, time = self.uniforms.time, "shader field uniforms");
        }
    }

    fn teardown(&mut self) {
        self.program = None;
        if let Some(lease) = self.lease.take() {
            let id = lease.id().clone();
            let deleted = lease.release();
            debug!(
                context = %id,
                deleted,
                time = self.uniforms.time,
                resolution = ?self.uniforms.resolution,
                mouse = ?self.uniforms.mouse,
                "shader field released its context"
            );
        }
    }
}
