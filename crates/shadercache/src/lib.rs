//! Compile-once program cache for sketch rendering contexts.
//!
//! ```text
//!   sketch mount ──▶ ContextLease::acquire ──▶ register_context(id, backend)
//!        │                                          │
//!        └─▶ lease.program(vs, fs) ──▶ get_or_create ──▶ hit: cached handle
//!                                                   └─▶ miss: compile ▶ link ▶ store
//!   sketch unmount ──▶ drop(lease) ──▶ cleanup(Some(id)) ──▶ delete programs
//! ```
//!
//! Backends implement [`GpuBackend`]. [`NagaBackend`] parses and validates
//! GLSL headlessly; `GlowBackend` (feature `glow`) drives a live OpenGL or
//! WebGL context.

mod backend;
mod cache;
mod compile;
#[cfg(feature = "glow")]
mod glow_backend;
mod lease;
#[cfg(feature = "naga-glsl")]
mod naga_backend;

pub use backend::{GpuBackend, ShaderStage};
pub use cache::{
    source_fingerprint, CacheStats, ContextGeneration, ContextId, ProgramCache,
    CACHE_MONITOR_INTERVAL,
};
pub use compile::{wrap_sketch_fragment, FULLSCREEN_VERTEX_GLSL};
#[cfg(feature = "glow")]
pub use glow_backend::GlowBackend;
pub use lease::ContextLease;
#[cfg(feature = "naga-glsl")]
pub use naga_backend::{NagaBackend, NagaProgram, NagaShader};

#[derive(Debug, thiserror::Error)]
pub enum ProgramError {
    #[error("rendering context '{0}' is not registered")]
    UnknownContext(ContextId),
    #[error("{stage} shader failed to compile: {log}")]
    Compile { stage: ShaderStage, log: String },
    #[error("program failed to link: {log}")]
    Link { log: String },
}
