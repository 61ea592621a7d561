use std::fmt;
use std::rc::Rc;

/// Pipeline stage of a single shader object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// A rendering context able to compile and link GPU programs.
///
/// The cache never creates or destroys the drawing surface behind a backend;
/// it only layers shader and program objects on top of it. Failures carry the
/// backend's diagnostic log. A backend is responsible for releasing any object
/// it allocated for a failed compile or link before returning the error.
pub trait GpuBackend {
    type Shader;
    type Program: Clone + PartialEq + fmt::Debug;

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<Self::Shader, String>;

    fn link_program(
        &self,
        vertex: &Self::Shader,
        fragment: &Self::Shader,
    ) -> Result<Self::Program, String>;

    fn delete_shader(&self, shader: Self::Shader);

    fn delete_program(&self, program: &Self::Program);
}

impl<T: GpuBackend + ?Sized> GpuBackend for Rc<T> {
    type Shader = T::Shader;
    type Program = T::Program;

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<Self::Shader, String> {
        (**self).compile_shader(stage, source)
    }

    fn link_program(
        &self,
        vertex: &Self::Shader,
        fragment: &Self::Shader,
    ) -> Result<Self::Program, String> {
        (**self).link_program(vertex, fragment)
    }

    fn delete_shader(&self, shader: Self::Shader) {
        (**self).delete_shader(shader)
    }

    fn delete_program(&self, program: &Self::Program) {
        (**self).delete_program(program)
    }
}
