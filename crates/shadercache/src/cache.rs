use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::time::Duration;

use scheduler::{EventLoop, IntervalId};
use tracing::{debug, info};

use crate::backend::GpuBackend;
use crate::compile::build_program;
use crate::ProgramError;

/// How often [`ProgramCache::monitor`] reports cache occupancy.
pub const CACHE_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Logical identifier of a rendering context (one per artwork instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        ContextId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContextId {
    fn from(value: &str) -> Self {
        ContextId::new(value)
    }
}

/// Fingerprint of a (vertex, fragment) source pair.
///
/// Only used to bucket entries; a hit additionally compares the full source
/// text, so colliding fingerprints never alias two programs.
pub fn source_fingerprint(vertex_source: &str, fragment_source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    (vertex_source, fragment_source).hash(&mut hasher);
    hasher.finish()
}

struct CachedProgram<P> {
    vertex_source: Box<str>,
    fragment_source: Box<str>,
    program: P,
}

/// Identifies one registration of a context id. Re-registering the same id
/// yields a new generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextGeneration(u64);

struct ContextEntry<B: GpuBackend> {
    backend: B,
    generation: ContextGeneration,
    programs: HashMap<u64, Vec<CachedProgram<B::Program>>>,
}

impl<B: GpuBackend> ContextEntry<B> {
    fn lookup(&self, fingerprint: u64, vertex: &str, fragment: &str) -> Option<&B::Program> {
        self.programs.get(&fingerprint)?.iter().find_map(|entry| {
            (&*entry.vertex_source == vertex && &*entry.fragment_source == fragment)
                .then_some(&entry.program)
        })
    }

    fn program_count(&self) -> usize {
        self.programs.values().map(Vec::len).sum()
    }

    /// Deletes every program owned by this context; returns how many went.
    fn destroy_programs(&mut self) -> usize {
        let mut destroyed = 0;
        for (_, bucket) in self.programs.drain() {
            for entry in bucket {
                self.backend.delete_program(&entry.program);
                destroyed += 1;
            }
        }
        destroyed
    }
}

/// Occupancy and effectiveness counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub contexts: usize,
    pub programs: usize,
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
}

pub(crate) struct CacheState<B: GpuBackend> {
    contexts: BTreeMap<ContextId, ContextEntry<B>>,
    next_generation: u64,
    hits: u64,
    misses: u64,
    failures: u64,
}

/// Compile-once, reuse-by-key store of linked GPU programs.
///
/// Entries are scoped to the rendering context that compiled them, so
/// [`ProgramCache::cleanup`] for one context never touches another context's
/// programs. Share the cache as `Rc<ProgramCache<B>>`; every method takes
/// `&self` and no internal borrow outlives a call.
pub struct ProgramCache<B: GpuBackend> {
    pub(crate) state: RefCell<CacheState<B>>,
}

impl<B: GpuBackend> Default for ProgramCache<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GpuBackend> ProgramCache<B> {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(CacheState {
                contexts: BTreeMap::new(),
                next_generation: 0,
                hits: 0,
                misses: 0,
                failures: 0,
            }),
        }
    }

    /// Associates `backend` with `id`.
    ///
    /// Re-registering an id first destroys the programs compiled against the
    /// previous backend, since they belong to a context that is going away.
    /// The returned generation lets the registrant release exactly this
    /// registration through [`ProgramCache::release_context`].
    pub fn register_context(&self, id: ContextId, backend: B) -> ContextGeneration {
        let (generation, previous) = {
            let mut state = self.state.borrow_mut();
            state.next_generation += 1;
            let generation = ContextGeneration(state.next_generation);
            let previous = state.contexts.insert(
                id.clone(),
                ContextEntry {
                    backend,
                    generation,
                    programs: HashMap::new(),
                },
            );
            (generation, previous)
        };
        if let Some(mut previous) = previous {
            let destroyed = previous.destroy_programs();
            debug!(context = %id, destroyed, "replaced rendering context");
        } else {
            debug!(context = %id, "registered rendering context");
        }
        generation
    }

    /// Like `cleanup(Some(id))`, but only while `id` is still registered
    /// under `generation`. A newer registration of the same id is left alone
    /// and `None` is returned.
    pub fn release_context(&self, id: &ContextId, generation: ContextGeneration) -> Option<usize> {
        let entry = {
            let mut state = self.state.borrow_mut();
            let current = state.contexts.get(id).map(|entry| entry.generation);
            if current == Some(generation) {
                state.contexts.remove(id)
            } else {
                None
            }
        };
        match entry {
            Some(mut entry) => {
                let destroyed = entry.destroy_programs();
                debug!(context = %id, destroyed, "released rendering context");
                Some(destroyed)
            }
            None => {
                debug!(context = %id, "context already replaced or released");
                None
            }
        }
    }

    pub fn has_context(&self, id: &ContextId) -> bool {
        self.state.borrow().contexts.contains_key(id)
    }

    /// The generation `id` is currently registered under, if any.
    pub fn generation_of(&self, id: &ContextId) -> Option<ContextGeneration> {
        self.state.borrow().contexts.get(id).map(|entry| entry.generation)
    }

    /// Runs `f` against the backend registered under `id`.
    ///
    /// `f` must not call back into this cache.
    pub fn with_context<R>(&self, id: &ContextId, f: impl FnOnce(&B) -> R) -> Option<R> {
        let state = self.state.borrow();
        state.contexts.get(id).map(|entry| f(&entry.backend))
    }

    /// Returns the program for the source pair, compiling and linking it on a
    /// miss. A hit never touches the backend.
    pub fn get_or_create(
        &self,
        context: &ContextId,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<B::Program, ProgramError> {
        let fingerprint = source_fingerprint(vertex_source, fragment_source);
        let mut state = self.state.borrow_mut();
        let state = &mut *state;
        let Some(entry) = state.contexts.get_mut(context) else {
            state.failures += 1;
            return Err(ProgramError::UnknownContext(context.clone()));
        };

        if let Some(program) = entry.lookup(fingerprint, vertex_source, fragment_source) {
            state.hits += 1;
            return Ok(program.clone());
        }

        state.misses += 1;
        let program = match build_program(&entry.backend, vertex_source, fragment_source) {
            Ok(program) => program,
            Err(err) => {
                state.failures += 1;
                return Err(err);
            }
        };

        entry
            .programs
            .entry(fingerprint)
            .or_default()
            .push(CachedProgram {
                vertex_source: vertex_source.into(),
                fragment_source: fragment_source.into(),
                program: program.clone(),
            });
        debug!(
            context = %context,
            fingerprint = %format!("{fingerprint:016x}"),
            "linked and cached program"
        );
        Ok(program)
    }

    /// Destroys cached programs and forgets contexts.
    ///
    /// With an id, only that context's programs are deleted and the context is
    /// deregistered; an unknown id is a no-op. Without an id, every program of
    /// every context is deleted and both maps are cleared. Returns the number of
    /// programs deleted.
    pub fn cleanup(&self, context: Option<&ContextId>) -> usize {
        let removed: Vec<(ContextId, ContextEntry<B>)> = {
            let mut state = self.state.borrow_mut();
            match context {
                Some(id) => state
                    .contexts
                    .remove(id)
                    .map(|entry| vec![(id.clone(), entry)])
                    .unwrap_or_default(),
                None => std::mem::take(&mut state.contexts).into_iter().collect(),
            }
        };

        let mut destroyed = 0;
        for (id, mut entry) in removed {
            let count = entry.destroy_programs();
            debug!(context = %id, destroyed = count, "released rendering context");
            destroyed += count;
        }
        destroyed
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.borrow();
        CacheStats {
            contexts: state.contexts.len(),
            programs: state.contexts.values().map(ContextEntry::program_count).sum(),
            hits: state.hits,
            misses: state.misses,
            failures: state.failures,
        }
    }

    pub fn context_ids(&self) -> Vec<ContextId> {
        self.state.borrow().contexts.keys().cloned().collect()
    }

    pub fn log_summary(&self) {
        let stats = self.stats();
        info!(
            cache_size = stats.programs,
            contexts = stats.contexts,
            hits = stats.hits,
            misses = stats.misses,
            "shader program cache"
        );
    }
}

impl<B: GpuBackend + 'static> ProgramCache<B> {
    /// Logs [`ProgramCache::log_summary`] every [`CACHE_MONITOR_INTERVAL`].
    ///
    /// The timer holds only a weak reference; once the cache is gone it stops
    /// reporting, but the caller still owns clearing the interval.
    pub fn monitor(self: &Rc<Self>, event_loop: &EventLoop) -> IntervalId {
        let cache: Weak<Self> = Rc::downgrade(self);
        event_loop.set_interval(CACHE_MONITOR_INTERVAL, move |_| {
            if let Some(cache) = cache.upgrade() {
                cache.log_summary();
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::ShaderStage;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeSet;

    /// Counting stub standing in for a GPU context.
    #[derive(Default)]
    pub(crate) struct StubBackend {
        next: Cell<u32>,
        pub compiles: Cell<u32>,
        pub links: Cell<u32>,
        pub live_shaders: RefCell<BTreeSet<u32>>,
        pub live_programs: RefCell<BTreeSet<u32>>,
        pub deleted_programs: RefCell<Vec<u32>>,
    }

    impl StubBackend {
        fn allocate(&self) -> u32 {
            self.next.set(self.next.get() + 1);
            self.next.get()
        }
    }

    impl GpuBackend for StubBackend {
        type Shader = u32;
        type Program = u32;

        fn compile_shader(&self, _stage: ShaderStage, source: &str) -> Result<u32, String> {
            self.compiles.set(self.compiles.get() + 1);
            if source.contains("syntax error") {
                return Err("ERROR: 0:1: syntax error".into());
            }
            let id = self.allocate();
            self.live_shaders.borrow_mut().insert(id);
            Ok(id)
        }

        fn link_program(&self, _vertex: &u32, _fragment: &u32) -> Result<u32, String> {
            self.links.set(self.links.get() + 1);
            let id = self.allocate();
            self.live_programs.borrow_mut().insert(id);
            Ok(id)
        }

        fn delete_shader(&self, shader: u32) {
            self.live_shaders.borrow_mut().remove(&shader);
        }

        fn delete_program(&self, program: &u32) {
            self.live_programs.borrow_mut().remove(program);
            self.deleted_programs.borrow_mut().push(*program);
        }
    }

    /// Backend whose link step always fails.
    #[derive(Default)]
    struct NoLinkBackend {
        inner: StubBackend,
    }

    impl GpuBackend for NoLinkBackend {
        type Shader = u32;
        type Program = u32;

        fn compile_shader(&self, stage: ShaderStage, source: &str) -> Result<u32, String> {
            self.inner.compile_shader(stage, source)
        }

        fn link_program(&self, _vertex: &u32, _fragment: &u32) -> Result<u32, String> {
            Err("varying v_texCoord not written by vertex shader".into())
        }

        fn delete_shader(&self, shader: u32) {
            self.inner.delete_shader(shader)
        }

        fn delete_program(&self, program: &u32) {
            self.inner.delete_program(program)
        }
    }

    const VERTEX: &str = "void main() { gl_Position = vec4(0.0); }";
    const FRAGMENT: &str = "void main() { gl_FragColor = vec4(1.0); }";

    fn cache_with(id: &str) -> (Rc<StubBackend>, ProgramCache<Rc<StubBackend>>) {
        let backend = Rc::new(StubBackend::default());
        let cache = ProgramCache::new();
        cache.register_context(ContextId::new(id), backend.clone());
        (backend, cache)
    }

    #[test]
    fn identical_sources_hit_the_cache() {
        let (backend, cache) = cache_with("lunch-break");
        let id = ContextId::new("lunch-break");
        let first = cache.get_or_create(&id, VERTEX, FRAGMENT).unwrap();
        let second = cache.get_or_create(&id, VERTEX, FRAGMENT).unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.compiles.get(), 2, "one compile per stage, once");
        assert_eq!(backend.links.get(), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.programs), (1, 1, 1));
    }

    #[test]
    fn single_character_change_misses() {
        let (_backend, cache) = cache_with("lunch-break");
        let id = ContextId::new("lunch-break");
        let base = cache.get_or_create(&id, VERTEX, FRAGMENT).unwrap();
        let vertex_changed = cache
            .get_or_create(&id, &VERTEX.replace("0.0", "1.0"), FRAGMENT)
            .unwrap();
        let fragment_changed = cache
            .get_or_create(&id, VERTEX, &FRAGMENT.replace("1.0", "0.5"))
            .unwrap();
        assert_ne!(base, vertex_changed);
        assert_ne!(base, fragment_changed);
        assert_ne!(vertex_changed, fragment_changed);
        assert_eq!(cache.stats().programs, 3);
    }

    #[test]
    fn swapped_stage_sources_are_distinct_keys() {
        assert_ne!(source_fingerprint("ab", "c"), source_fingerprint("a", "bc"));
        assert_ne!(source_fingerprint("x", "y"), source_fingerprint("y", "x"));
    }

    #[test]
    fn compile_failure_leaves_no_entry_and_no_shaders() {
        let (backend, cache) = cache_with("broken");
        let id = ContextId::new("broken");
        let err = cache
            .get_or_create(&id, VERTEX, "syntax error")
            .unwrap_err();
        assert!(matches!(
            err,
            ProgramError::Compile {
                stage: ShaderStage::Fragment,
                ..
            }
        ));
        assert!(backend.live_shaders.borrow().is_empty());
        assert_eq!(cache.stats().programs, 0);
        assert_eq!(cache.stats().failures, 1);

        // A clean retry with fixed sources succeeds.
        assert!(cache.get_or_create(&id, VERTEX, FRAGMENT).is_ok());
    }

    #[test]
    fn link_failure_reports_log_and_caches_nothing() {
        let backend = Rc::new(NoLinkBackend::default());
        let cache = ProgramCache::new();
        let id = ContextId::new("no-link");
        cache.register_context(id.clone(), backend.clone());
        let err = cache.get_or_create(&id, VERTEX, FRAGMENT).unwrap_err();
        match err {
            ProgramError::Link { log } => assert!(log.contains("v_texCoord")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(backend.inner.live_shaders.borrow().is_empty());
        assert_eq!(cache.stats().programs, 0);
    }

    #[test]
    fn unknown_context_is_reported() {
        let cache: ProgramCache<Rc<StubBackend>> = ProgramCache::new();
        let err = cache
            .get_or_create(&ContextId::new("ghost"), VERTEX, FRAGMENT)
            .unwrap_err();
        assert!(matches!(err, ProgramError::UnknownContext(id) if id.as_str() == "ghost"));
        let stats = cache.stats();
        assert_eq!((stats.failures, stats.misses), (1, 0));
    }

    #[test]
    fn stale_generation_does_not_release_a_newer_registration() {
        let (old, cache) = cache_with("field");
        let id = ContextId::new("field");
        let first = cache.register_context(id.clone(), old.clone());
        cache.get_or_create(&id, VERTEX, FRAGMENT).unwrap();

        let fresh = Rc::new(StubBackend::default());
        let second = cache.register_context(id.clone(), fresh.clone());
        assert_ne!(first, second);
        cache.get_or_create(&id, VERTEX, FRAGMENT).unwrap();

        assert_eq!(cache.release_context(&id, first), None);
        assert!(cache.has_context(&id));
        assert_eq!(fresh.live_programs.borrow().len(), 1);

        assert_eq!(cache.release_context(&id, second), Some(1));
        assert!(!cache.has_context(&id));
        assert_eq!(cache.release_context(&id, second), None);
    }

    #[test]
    fn per_context_cleanup_is_scoped() {
        let first = Rc::new(StubBackend::default());
        let second = Rc::new(StubBackend::default());
        let cache = ProgramCache::new();
        let a = ContextId::new("a");
        let b = ContextId::new("b");
        cache.register_context(a.clone(), first.clone());
        cache.register_context(b.clone(), second.clone());
        cache.get_or_create(&a, VERTEX, FRAGMENT).unwrap();
        cache.get_or_create(&b, VERTEX, FRAGMENT).unwrap();

        assert_eq!(cache.cleanup(Some(&a)), 1);
        assert!(first.live_programs.borrow().is_empty());
        assert_eq!(second.live_programs.borrow().len(), 1);
        assert!(!cache.has_context(&a));
        assert!(cache.has_context(&b));

        // Second cleanup of the same id is a no-op.
        assert_eq!(cache.cleanup(Some(&a)), 0);
        assert_eq!(first.deleted_programs.borrow().len(), 1);
    }

    #[test]
    fn full_cleanup_clears_everything() {
        let (backend, cache) = cache_with("a");
        let other = Rc::new(StubBackend::default());
        cache.register_context(ContextId::new("b"), other.clone());
        cache
            .get_or_create(&ContextId::new("a"), VERTEX, FRAGMENT)
            .unwrap();
        cache
            .get_or_create(&ContextId::new("b"), VERTEX, FRAGMENT)
            .unwrap();

        assert_eq!(cache.cleanup(None), 2);
        assert_eq!(cache.stats().contexts, 0);
        assert_eq!(cache.stats().programs, 0);
        assert!(backend.live_programs.borrow().is_empty());
        assert!(other.live_programs.borrow().is_empty());
        assert_eq!(cache.cleanup(None), 0);
    }

    #[test]
    fn reregistering_context_drops_stale_programs() {
        let (old, cache) = cache_with("sketch");
        let id = ContextId::new("sketch");
        let stale = cache.get_or_create(&id, VERTEX, FRAGMENT).unwrap();

        let fresh_backend = Rc::new(StubBackend::default());
        cache.register_context(id.clone(), fresh_backend.clone());
        assert_eq!(old.deleted_programs.borrow().as_slice(), &[stale]);

        cache.get_or_create(&id, VERTEX, FRAGMENT).unwrap();
        assert_eq!(fresh_backend.links.get(), 1);
    }

    #[test]
    fn monitor_stops_reporting_after_cache_drops() {
        use scheduler::ManualClock;

        let clock = Rc::new(ManualClock::new());
        let event_loop = EventLoop::new(clock.clone());
        let cache: Rc<ProgramCache<Rc<StubBackend>>> = Rc::new(ProgramCache::new());
        let interval = cache.monitor(&event_loop);
        drop(cache);
        clock.advance(CACHE_MONITOR_INTERVAL);
        event_loop.run_frame();
        event_loop.clear_interval(interval);
        assert_eq!(event_loop.active_intervals(), 0);
    }
}
