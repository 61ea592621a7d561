use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use scheduler::{EventLoop, IntervalId};
use tracing::{debug, info};

use crate::instance::InstanceHandle;
use crate::sketch::{Container, Sketch};

/// How often [`SketchRegistry::monitor`] logs the live instance summary.
pub const REGISTRY_MONITOR_INTERVAL: Duration = Duration::from_secs(15);

/// Tracks every live sketch instance by id.
///
/// At most one instance exists per id: creating under an id that is already
/// in use tears the old instance down first.
pub struct SketchRegistry {
    event_loop: Rc<EventLoop>,
    instances: RefCell<BTreeMap<String, InstanceHandle>>,
}

impl SketchRegistry {
    pub fn new(event_loop: Rc<EventLoop>) -> Self {
        Self {
            event_loop,
            instances: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn event_loop(&self) -> &Rc<EventLoop> {
        &self.event_loop
    }

    /// Starts `sketch` in `container` under `id`, replacing any live
    /// instance with the same id.
    pub fn create(
        &self,
        id: impl Into<String>,
        sketch: Box<dyn Sketch>,
        container: Container,
    ) -> InstanceHandle {
        let id = id.into();
        if self.remove(&id) {
            debug!(instance = %id, "replaced existing sketch instance");
        }

        let handle = InstanceHandle::start(id.clone(), sketch, container, self.event_loop.clone());
        let displaced = self
            .instances
            .borrow_mut()
            .insert(id.clone(), handle.clone());
        // Only possible when setup created another instance under the same id.
        if let Some(displaced) = displaced {
            displaced.remove();
        }
        info!(instance = %id, live = self.count(), "sketch instance created");
        handle
    }

    /// Tears down the instance registered under `id`. Returns `false` when
    /// nothing was registered.
    pub fn remove(&self, id: &str) -> bool {
        let Some(handle) = self.instances.borrow().get(id).cloned() else {
            return false;
        };
        handle.remove();
        // Teardown may have re-created the id; only drop the entry we removed.
        let mut instances = self.instances.borrow_mut();
        if instances
            .get(id)
            .is_some_and(|current| current.same_instance(&handle))
        {
            instances.remove(id);
        }
        debug!(instance = %id, "sketch instance removed");
        true
    }

    pub fn get(&self, id: &str) -> Option<InstanceHandle> {
        self.instances.borrow().get(id).cloned()
    }

    /// Removes one instance when `id` is given, otherwise every instance.
    /// Returns the number of instances torn down.
    pub fn cleanup(&self, id: Option<&str>) -> usize {
        match id {
            Some(id) => usize::from(self.remove(id)),
            None => self.cleanup_all(),
        }
    }

    pub fn cleanup_all(&self) -> usize {
        let ids: Vec<String> = self.instances.borrow().keys().cloned().collect();
        let removed = ids.iter().filter(|id| self.remove(id)).count();
        if removed > 0 {
            info!(removed, "cleaned up all sketch instances");
        }
        removed
    }

    pub fn count(&self) -> usize {
        self.instances.borrow().len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.instances.borrow().keys().cloned().collect()
    }

    pub fn log_summary(&self) {
        let instances = self.instances.borrow();
        let summary: Vec<String> = instances
            .values()
            .map(|handle| format!("{}:{:?}:{}", handle.id(), handle.state(), handle.frame_count()))
            .collect();
        info!(
            live = instances.len(),
            instances = %summary.join(", "),
            "sketch registry summary"
        );
    }

    /// Logs [`SketchRegistry::log_summary`] every
    /// [`REGISTRY_MONITOR_INTERVAL`] for as long as the registry is alive.
    pub fn monitor(self: &Rc<Self>) -> IntervalId {
        let weak: Weak<Self> = Rc::downgrade(self);
        self.event_loop
            .set_interval(REGISTRY_MONITOR_INTERVAL, move |_| {
                if let Some(registry) = weak.upgrade() {
                    registry.log_summary();
                }
            })
    }

    /// Creates an instance that is removed again when the lease drops.
    pub fn lease(
        self: &Rc<Self>,
        id: impl Into<String>,
        sketch: Box<dyn Sketch>,
        container: Container,
    ) -> InstanceLease {
        let handle = self.create(id, sketch, container);
        InstanceLease {
            registry: Rc::downgrade(self),
            handle,
        }
    }
}

impl Drop for SketchRegistry {
    fn drop(&mut self) {
        let instances = std::mem::take(self.instances.get_mut());
        for handle in instances.into_values() {
            handle.remove();
        }
    }
}

/// Scoped ownership of one registered instance.
pub struct InstanceLease {
    registry: Weak<SketchRegistry>,
    handle: InstanceHandle,
}

impl InstanceLease {
    pub fn handle(&self) -> &InstanceHandle {
        &self.handle
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            self.handle.remove();
            return;
        };
        let current = registry.get(self.handle.id());
        match current {
            Some(current) if current.same_instance(&self.handle) => {
                registry.remove(self.handle.id());
            }
            _ => {
                self.handle.remove();
            }
        }
    }
}
