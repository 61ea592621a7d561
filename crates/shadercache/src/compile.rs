use tracing::error;

use crate::backend::{GpuBackend, ShaderStage};
use crate::ProgramError;

/// Compiles both stages and links them into a program.
///
/// Shader objects are released once the link attempt is over, whatever its
/// outcome, and a vertex shader compiled before a failing fragment stage is
/// released too. Nothing partially built escapes on the error path.
pub(crate) fn build_program<B: GpuBackend + ?Sized>(
    backend: &B,
    vertex_source: &str,
    fragment_source: &str,
) -> Result<B::Program, ProgramError> {
    let vertex = compile_stage(backend, ShaderStage::Vertex, vertex_source)?;
    let fragment = match compile_stage(backend, ShaderStage::Fragment, fragment_source) {
        Ok(fragment) => fragment,
        Err(err) => {
            backend.delete_shader(vertex);
            return Err(err);
        }
    };

    let linked = backend.link_program(&vertex, &fragment);
    backend.delete_shader(vertex);
    backend.delete_shader(fragment);

    linked.map_err(|log| {
        error!(%log, "program linking error");
        ProgramError::Link { log }
    })
}

fn compile_stage<B: GpuBackend + ?Sized>(
    backend: &B,
    stage: ShaderStage,
    source: &str,
) -> Result<B::Shader, ProgramError> {
    backend.compile_shader(stage, source).map_err(|log| {
        error!(%stage, %log, "shader compilation error");
        ProgramError::Compile { stage, log }
    })
}

/// Turns a WebGL-style sketch fragment shader into Vulkan-flavoured GLSL 450.
///
/// Sketch shaders are written against loose uniforms (`u_time`,
/// `u_resolution`, `u_mouse`), a `v_texCoord` varying and `gl_FragColor`.
/// The wrapper:
///
/// 1. Strips `#version`, `precision` statements, the sketch uniform
///    declarations and `varying` declarations.
/// 2. Prepends [`SKETCH_HEADER`] which declares the uniform block, the
///    interpolated texture coordinate and the colour output, and aliases the
///    sketch names onto them with macros.
pub fn wrap_sketch_fragment(source: &str) -> String {
    let mut sanitized = String::with_capacity(source.len());
    for line in source.lines() {
        let trimmed = line.trim_start();
        let skip = trimmed.starts_with("#version")
            || trimmed.starts_with("precision ")
            || trimmed.starts_with("varying ")
            || (trimmed.starts_with("uniform ")
                && (trimmed.contains("u_time")
                    || trimmed.contains("u_resolution")
                    || trimmed.contains("u_mouse")));
        if skip {
            continue;
        }
        sanitized.push_str(line);
        sanitized.push('\n');
    }

    format!("{SKETCH_HEADER}\n#line 1\n{sanitized}")
}

/// GLSL prologue injected ahead of every wrapped sketch fragment shader.
const SKETCH_HEADER: &str = r"#version 450
layout(location = 0) in vec2 v_texCoord;
layout(location = 0) out vec4 artbox_fragColor;

layout(std140, set = 0, binding = 0) uniform SketchParams {
    vec2 _u_resolution;
    vec2 _u_mouse;
    float _u_time;
} params;

#define u_resolution params._u_resolution
#define u_mouse params._u_mouse
#define u_time params._u_time
#define gl_FragColor artbox_fragColor
";

/// Full-screen triangle feeding `v_texCoord` to wrapped sketch fragments.
pub const FULLSCREEN_VERTEX_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_texCoord;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    vec2 pos = positions[uint(gl_VertexIndex)];
    v_texCoord = pos * 0.5 + vec2(0.5, 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";
