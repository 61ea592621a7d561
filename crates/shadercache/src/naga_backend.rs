use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{Binding, Handle, Module, Type, TypeInner};
use tracing::trace;

use crate::backend::{GpuBackend, ShaderStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NagaShader(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NagaProgram(u32);

struct CompiledStage {
    stage: ShaderStage,
    module: Module,
}

#[derive(Default)]
struct NagaState {
    next_id: u32,
    shaders: HashMap<u32, CompiledStage>,
    programs: BTreeSet<u32>,
    compiles: u64,
    links: u64,
}

/// Headless rendering context that compiles GLSL with naga.
///
/// Each stage is parsed and validated; linking checks that both stages carry
/// an entry point and that every fragment input location is written by the
/// vertex stage. Programs are plain ids, which is all the cache needs.
#[derive(Default)]
pub struct NagaBackend {
    label: String,
    state: RefCell<NagaState>,
}

impl NagaBackend {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: RefCell::default(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn live_shaders(&self) -> usize {
        self.state.borrow().shaders.len()
    }

    pub fn live_programs(&self) -> usize {
        self.state.borrow().programs.len()
    }

    pub fn is_program(&self, program: &NagaProgram) -> bool {
        self.state.borrow().programs.contains(&program.0)
    }

    pub fn compile_count(&self) -> u64 {
        self.state.borrow().compiles
    }

    pub fn link_count(&self) -> u64 {
        self.state.borrow().links
    }
}

fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    }
}

fn parse_stage(stage: ShaderStage, source: &str) -> Result<Module, String> {
    let mut frontend = Frontend::default();
    let module = frontend
        .parse(&Options::from(naga_stage(stage)), source)
        .map_err(|err| err.emit_to_string(source))?;
    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|err| err.emit_to_string(source))?;
    Ok(module)
}

fn collect_locations(
    module: &Module,
    ty: Handle<Type>,
    binding: Option<&Binding>,
    out: &mut BTreeSet<u32>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => {
            out.insert(*location);
        }
        Some(_) => {}
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

fn vertex_outputs(module: &Module) -> Option<BTreeSet<u32>> {
    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga::ShaderStage::Vertex)?;
    let mut outputs = BTreeSet::new();
    if let Some(result) = &entry.function.result {
        collect_locations(module, result.ty, result.binding.as_ref(), &mut outputs);
    }
    Some(outputs)
}

fn fragment_inputs(module: &Module) -> Option<BTreeSet<u32>> {
    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == naga::ShaderStage::Fragment)?;
    let mut inputs = BTreeSet::new();
    for argument in &entry.function.arguments {
        collect_locations(module, argument.ty, argument.binding.as_ref(), &mut inputs);
    }
    Some(inputs)
}

impl GpuBackend for NagaBackend {
    type Shader = NagaShader;
    type Program = NagaProgram;

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<NagaShader, String> {
        self.state.borrow_mut().compiles += 1;
        let module = parse_stage(stage, source)?;
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        state.shaders.insert(id, CompiledStage { stage, module });
        trace!(backend = %self.label, %stage, id, "compiled shader");
        Ok(NagaShader(id))
    }

    fn link_program(
        &self,
        vertex: &NagaShader,
        fragment: &NagaShader,
    ) -> Result<NagaProgram, String> {
        let mut state = self.state.borrow_mut();
        state.links += 1;
        let vertex = state
            .shaders
            .get(&vertex.0)
            .filter(|compiled| compiled.stage == ShaderStage::Vertex)
            .ok_or_else(|| "vertex shader object is missing or of the wrong stage".to_string())?;
        let fragment = state
            .shaders
            .get(&fragment.0)
            .filter(|compiled| compiled.stage == ShaderStage::Fragment)
            .ok_or_else(|| {
                "fragment shader object is missing or of the wrong stage".to_string()
            })?;

        let outputs = vertex_outputs(&vertex.module)
            .ok_or_else(|| "vertex shader has no vertex entry point".to_string())?;
        let inputs = fragment_inputs(&fragment.module)
            .ok_or_else(|| "fragment shader has no fragment entry point".to_string())?;
        if let Some(missing) = inputs.difference(&outputs).next() {
            return Err(format!(
                "fragment input at location {missing} is not written by the vertex shader"
            ));
        }

        state.next_id += 1;
        let id = state.next_id;
        state.programs.insert(id);
        Ok(NagaProgram(id))
    }

    fn delete_shader(&self, shader: NagaShader) {
        self.state.borrow_mut().shaders.remove(&shader.0);
    }

    fn delete_program(&self, program: &NagaProgram) {
        self.state.borrow_mut().programs.remove(&program.0);
    }
}
