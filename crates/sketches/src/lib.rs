//! Registry of live sketch instances, at most one per logical id.
//!
//! A sketch is mounted into a caller-owned [`Container`] and runs its own
//! animation-frame chain plus input listeners on the shared
//! [`scheduler::EventLoop`]. Removing an instance stops the chain, unbinds the
//! listeners and runs the sketch's teardown exactly once; no draw happens after
//! removal. [`SketchRegistry::create`] under an id that is already live tears
//! the old instance down before the new one starts.

mod instance;
mod registry;
mod sketch;

pub use instance::{InstanceHandle, InstanceState};
pub use registry::{InstanceLease, SketchRegistry, REGISTRY_MONITOR_INTERVAL};
pub use sketch::{Container, Frame, Sketch, SketchContext};
