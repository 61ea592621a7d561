use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};
use shadercache::{wrap_sketch_fragment, ContextId, ContextLease, NagaBackend, FULLSCREEN_VERTEX_GLSL};

use crate::cli::CompileArgs;
use crate::demos::Programs;

/// Compiles and links a shader pair once through the program cache, the same
/// path a mounted sketch takes.
pub fn run(args: CompileArgs) -> Result<()> {
    let vertex = match &args.vertex {
        Some(path) => read_source(path)?,
        None => FULLSCREEN_VERTEX_GLSL.to_string(),
    };
    let fragment = read_source(&args.fragment)?;
    let fragment = if args.sketch {
        wrap_sketch_fragment(&fragment)
    } else {
        fragment
    };

    let label = args.fragment.display().to_string();
    let backend = Rc::new(NagaBackend::new(label.clone()));
    let programs = Rc::new(Programs::new());
    let lease = ContextLease::acquire(&programs, ContextId::new(label.clone()), backend.clone());

    let program = lease
        .program(&vertex, &fragment)
        .with_context(|| format!("failed to build program from {label}"))?;
    println!(
        "ok: {label} linked as {program:?} ({} compiles, {} link)",
        backend.compile_count(),
        backend.link_count()
    );
    lease.release();
    Ok(())
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("failed to read shader source {}", path.display()))
}
