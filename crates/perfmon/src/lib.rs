//! Runtime performance sampler.
//!
//! A [`PerformanceMonitor`] keeps a flat map of named metrics (milliseconds,
//! megabytes, frames per second) fed by a handful of samplers scheduled on the
//! shared [`EventLoop`]. Samplers whose capability the [`MetricsSource`] lacks
//! disable themselves quietly.

mod fps;
mod source;

pub use fps::FpsMeter;
pub use source::{HeapUsage, MetricsSource, NavigationTiming, NullSource, ProcessSource, StaticSource};

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use scheduler::{Clock, EventLoop, IntervalId};
use serde::Serialize;
use tracing::{debug, info, warn};

pub const MEMORY_WARNING_MB: f64 = 200.0;
pub const FPS_WARNING: f64 = 30.0;
pub const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);
pub const WARNING_CHECK_INTERVAL: Duration = Duration::from_secs(5);

pub const METRIC_FPS: &str = "fps";
pub const METRIC_PAGE_LOAD: &str = "pageLoad";
pub const METRIC_MEMORY_USED: &str = "memoryUsed";
pub const METRIC_MEMORY_TOTAL: &str = "memoryTotal";
pub const METRIC_MEMORY_LIMIT: &str = "memoryLimit";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PerformanceWarning {
    HighMemory { used_mb: f64 },
    LowFps { fps: f64 },
}

impl fmt::Display for PerformanceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighMemory { used_mb } => write!(f, "high memory usage detected: {used_mb}MB"),
            Self::LowFps { fps } => write!(f, "low FPS detected: {fps}"),
        }
    }
}

fn to_mb(bytes: u64) -> f64 {
    (bytes as f64 / 1024.0 / 1024.0).round()
}

fn to_ms(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

pub struct PerformanceMonitor {
    clock: Rc<dyn Clock>,
    source: Box<dyn MetricsSource>,
    development: bool,
    metrics: RefCell<BTreeMap<String, f64>>,
}

impl PerformanceMonitor {
    /// `development` enables the sampler bundle in [`PerformanceMonitor::init`]
    /// and per-sample debug logging.
    pub fn new(clock: Rc<dyn Clock>, source: Box<dyn MetricsSource>, development: bool) -> Self {
        Self {
            clock,
            source,
            development,
            metrics: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn is_development(&self) -> bool {
        self.development
    }

    /// Stores `value` under `name`, replacing any earlier value.
    pub fn record(&self, name: impl Into<String>, value: f64) {
        self.metrics.borrow_mut().insert(name.into(), value);
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.borrow().get(name).copied()
    }

    pub fn all_metrics(&self) -> BTreeMap<String, f64> {
        self.metrics.borrow().clone()
    }

    /// Starts a render-time measurement; calling the returned closure stores
    /// the elapsed milliseconds under `label`.
    pub fn measure_render_time(self: &Rc<Self>, label: impl Into<String>) -> impl FnOnce() + 'static {
        let label = label.into();
        let start = self.clock.now();
        let monitor = Rc::clone(self);
        move || {
            let elapsed = to_ms(monitor.clock.now().saturating_sub(start));
            if monitor.development {
                debug!(component = %label, render_ms = elapsed, "render time");
            }
            monitor.record(label, elapsed);
        }
    }

    /// Records `pageLoad` once the loop's load event fires.
    pub fn measure_page_load(self: &Rc<Self>, event_loop: &EventLoop) {
        let weak = Rc::downgrade(self);
        event_loop.on_load(move |loaded_at| {
            let Some(monitor) = weak.upgrade() else {
                return;
            };
            let load = match monitor.source.navigation_timing() {
                Some(timing) => timing.load_time(),
                None => loaded_at,
            };
            let load_ms = to_ms(load);
            monitor.record(METRIC_PAGE_LOAD, load_ms);
            if monitor.development {
                debug!(load_ms, "page load time");
            }
        });
    }

    /// Takes one memory sample, recording it in megabytes.
    pub fn sample_memory(&self) -> Option<HeapUsage> {
        let usage = self.source.heap_usage()?;
        let (used, total, limit) = (to_mb(usage.used), to_mb(usage.total), to_mb(usage.limit));
        self.record(METRIC_MEMORY_USED, used);
        self.record(METRIC_MEMORY_TOTAL, total);
        self.record(METRIC_MEMORY_LIMIT, limit);
        if self.development {
            debug!(used_mb = used, total_mb = total, limit_mb = limit, "memory usage");
        }
        Some(usage)
    }

    /// Samples memory every [`MEMORY_SAMPLE_INTERVAL`]. Returns `None` when
    /// the source cannot report heap usage.
    pub fn monitor_memory(self: &Rc<Self>, event_loop: &EventLoop) -> Option<IntervalId> {
        if self.source.heap_usage().is_none() {
            debug!("heap usage unavailable; memory sampler disabled");
            return None;
        }
        let weak: Weak<Self> = Rc::downgrade(self);
        Some(event_loop.set_interval(MEMORY_SAMPLE_INTERVAL, move |_| {
            if let Some(monitor) = weak.upgrade() {
                monitor.sample_memory();
            }
        }))
    }

    pub fn measure_fps(self: &Rc<Self>, event_loop: &Rc<EventLoop>) -> FpsMeter {
        FpsMeter::start(Rc::clone(event_loop), self)
    }

    /// Compares the latest samples against the thresholds and logs each
    /// breach.
    pub fn check_performance_warnings(&self) -> Vec<PerformanceWarning> {
        let mut warnings = Vec::new();
        if let Some(used_mb) = self.metric(METRIC_MEMORY_USED) {
            if used_mb > MEMORY_WARNING_MB {
                warnings.push(PerformanceWarning::HighMemory { used_mb });
            }
        }
        if let Some(fps) = self.metric(METRIC_FPS) {
            if fps < FPS_WARNING {
                warnings.push(PerformanceWarning::LowFps { fps });
            }
        }
        for warning in &warnings {
            warn!("{warning}");
        }
        warnings
    }

    pub fn watch_warnings(self: &Rc<Self>, event_loop: &EventLoop) -> IntervalId {
        let weak: Weak<Self> = Rc::downgrade(self);
        event_loop.set_interval(WARNING_CHECK_INTERVAL, move |_| {
            if let Some(monitor) = weak.upgrade() {
                monitor.check_performance_warnings();
            }
        })
    }

    /// Starts page-load, memory and FPS sampling in development mode. Outside
    /// development the returned handles are empty.
    pub fn init(self: &Rc<Self>, event_loop: &Rc<EventLoop>) -> MonitorHandles {
        let mut handles = MonitorHandles::new(event_loop);
        if !self.development {
            return handles;
        }
        self.measure_page_load(event_loop);
        if let Some(interval) = self.monitor_memory(event_loop) {
            handles.push_interval(interval);
        }
        handles.fps = Some(self.measure_fps(event_loop));
        info!(
            memory = handles.intervals.len() == 1,
            "development performance monitors started"
        );
        handles
    }
}

/// Everything a set of samplers keeps scheduled. Cancelled on drop.
pub struct MonitorHandles {
    event_loop: Weak<EventLoop>,
    intervals: Vec<IntervalId>,
    fps: Option<FpsMeter>,
}

impl MonitorHandles {
    pub fn new(event_loop: &Rc<EventLoop>) -> Self {
        Self {
            event_loop: Rc::downgrade(event_loop),
            intervals: Vec::new(),
            fps: None,
        }
    }

    pub fn push_interval(&mut self, interval: IntervalId) {
        self.intervals.push(interval);
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty() && self.fps.is_none()
    }

    /// Clears every interval and stops the FPS meter. Safe to call twice.
    pub fn cancel(&mut self) {
        let intervals = std::mem::take(&mut self.intervals);
        if let Some(event_loop) = self.event_loop.upgrade() {
            for interval in intervals {
                event_loop.clear_interval(interval);
            }
        }
        if let Some(fps) = self.fps.take() {
            fps.stop();
        }
    }
}

impl Drop for MonitorHandles {
    fn drop(&mut self) {
        self.cancel();
    }
}
