use glow::HasContext;

use crate::backend::{GpuBackend, ShaderStage};

/// Rendering context backed by a live OpenGL / WebGL context through `glow`.
///
/// ```no_run
/// use std::rc::Rc;
///
/// use shadercache::{
///     wrap_sketch_fragment, ContextId, ContextLease, GlowBackend, ProgramCache, ProgramError,
///     FULLSCREEN_VERTEX_GLSL,
/// };
///
/// fn mount(gl: glow::Context) -> Result<glow::Program, ProgramError> {
///     let cache = Rc::new(ProgramCache::new());
///     // SAFETY: the caller made `gl` current on this thread.
///     let backend = unsafe { GlowBackend::new(gl) };
///     let lease = ContextLease::acquire(&cache, ContextId::new("canvas"), backend);
///     let fragment = wrap_sketch_fragment("void main() { gl_FragColor = vec4(1.0); }");
///     lease.program(FULLSCREEN_VERTEX_GLSL, &fragment)
/// }
/// ```
pub struct GlowBackend<C: HasContext> {
    gl: C,
}

impl<C: HasContext> GlowBackend<C> {
    /// Wraps `gl`.
    ///
    /// # Safety
    ///
    /// The context must stay current on the calling thread for as long as the
    /// backend issues GL calls, i.e. until the owning cache entry is cleaned up.
    pub unsafe fn new(gl: C) -> Self {
        Self { gl }
    }

    pub fn gl(&self) -> &C {
        &self.gl
    }
}

impl<C: HasContext> GpuBackend for GlowBackend<C> {
    type Shader = C::Shader;
    type Program = C::Program;

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<C::Shader, String> {
        let kind = match stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
        };
        // SAFETY: `GlowBackend::new` requires the context to be current.
        unsafe {
            let shader = self.gl.create_shader(kind)?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                let log = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                return Err(log);
            }
            Ok(shader)
        }
    }

    fn link_program(&self, vertex: &C::Shader, fragment: &C::Shader) -> Result<C::Program, String> {
        // SAFETY: see `compile_shader`.
        unsafe {
            let program = self.gl.create_program()?;
            self.gl.attach_shader(program, *vertex);
            self.gl.attach_shader(program, *fragment);
            self.gl.link_program(program);
            self.gl.detach_shader(program, *vertex);
            self.gl.detach_shader(program, *fragment);
            if !self.gl.get_program_link_status(program) {
                let log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                return Err(log);
            }
            Ok(program)
        }
    }

    fn delete_shader(&self, shader: C::Shader) {
        // SAFETY: see `compile_shader`.
        unsafe { self.gl.delete_shader(shader) }
    }

    fn delete_program(&self, program: &C::Program) {
        // SAFETY: see `compile_shader`.
        unsafe { self.gl.delete_program(*program) }
    }
}
