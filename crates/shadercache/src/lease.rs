use std::rc::Rc;

use tracing::warn;

use crate::backend::GpuBackend;
use crate::cache::{ContextGeneration, ContextId, ProgramCache};
use crate::ProgramError;

/// Scoped registration of a rendering context.
///
/// Acquiring registers the backend under `id`; dropping the lease (normal
/// exit, early return or unwinding) deletes every program compiled for it and
/// deregisters the context. A lease whose id has since been registered again
/// by someone else releases nothing.
pub struct ContextLease<B: GpuBackend> {
    cache: Rc<ProgramCache<B>>,
    id: ContextId,
    generation: ContextGeneration,
    released: bool,
}

impl<B: GpuBackend> ContextLease<B> {
    pub fn acquire(cache: &Rc<ProgramCache<B>>, id: ContextId, backend: B) -> Self {
        let generation = cache.register_context(id.clone(), backend);
        Self {
            cache: Rc::clone(cache),
            id,
            generation,
            released: false,
        }
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    pub fn cache(&self) -> &Rc<ProgramCache<B>> {
        &self.cache
    }

    pub fn program(
        &self,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<B::Program, ProgramError> {
        self.cache
            .get_or_create(&self.id, vertex_source, fragment_source)
    }

    /// Whether the cache still holds this lease's registration.
    pub fn is_current(&self) -> bool {
        !self.released && self.cache.generation_of(&self.id) == Some(self.generation)
    }

    /// Releases now instead of at scope exit; returns the number of programs
    /// deleted (zero once the id was registered again elsewhere).
    pub fn release(mut self) -> usize {
        self.released = true;
        self.cache
            .release_context(&self.id, self.generation)
            .unwrap_or(0)
    }
}

impl<B: GpuBackend> Drop for ContextLease<B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Never panic while unwinding; a busy cache keeps the context.
        if self.cache.state.try_borrow_mut().is_err() {
            warn!(context = %self.id, "program cache busy; context left registered");
            return;
        }
        self.cache.release_context(&self.id, self.generation);
    }
}
