use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use artconfig::{ArtConfig, ResolvedSketch};
use perfmon::{PerformanceMonitor, PerformanceWarning, ProcessSource};
use scheduler::{EventLoop, InputEvent, IntervalId};
use serde::Serialize;
use shadercache::CacheStats;
use sketches::{Container, SketchRegistry};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::{apply_overrides, load_config};
use crate::cli::RunArgs;
use crate::demos::{self, Programs};
use crate::paths::AppPaths;

/// Period of the synthetic pointer that sweeps the canvases.
const POINTER_SWEEP_PERIOD: Duration = Duration::from_millis(50);

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run(args: RunArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let (mut config, origin) = load_config(args.config.as_deref(), &paths)?;
    apply_overrides(&mut config, &args)?;
    tracing::debug!(
        config_dir = %paths.config_dir().display(),
        %origin,
        sketches = config.sketches.len(),
        "resolved exhibition config"
    );

    let report = run_exhibition(&config, EventLoop::with_system_clock())?;
    if args.metrics_json {
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to render metrics report")?;
        println!("{rendered}");
    }
    Ok(())
}

/// Final snapshot printed by `--metrics-json`.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub duration_ms: f64,
    pub turns: u64,
    pub sketches: usize,
    pub torn_down: usize,
    pub metrics: BTreeMap<String, f64>,
    pub warnings: Vec<PerformanceWarning>,
    pub cache: CacheReport,
}

#[derive(Debug, Serialize)]
pub struct CacheReport {
    pub contexts: usize,
    pub programs: usize,
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
}

impl From<CacheStats> for CacheReport {
    fn from(stats: CacheStats) -> Self {
        Self {
            contexts: stats.contexts,
            programs: stats.programs,
            hits: stats.hits,
            misses: stats.misses,
            failures: stats.failures,
        }
    }
}

/// Mounts every configured sketch on `event_loop`, drives it for the
/// configured duration and tears everything down again.
pub fn run_exhibition(config: &ArtConfig, event_loop: Rc<EventLoop>) -> Result<RunReport> {
    let frame_period = Duration::try_from_secs_f64(1.0 / f64::from(config.frame_rate()))
        .with_context(|| format!("unusable frame rate {}", config.frame_rate()))?;
    let programs: Rc<Programs> = Rc::new(Programs::new());
    let registry = Rc::new(SketchRegistry::new(event_loop.clone()));
    let monitor = Rc::new(PerformanceMonitor::new(
        event_loop.clock().clone(),
        Box::new(ProcessSource),
        config.monitors.development,
    ));

    let mut handles = monitor.init(&event_loop);
    if config.monitors.warnings {
        handles.push_interval(monitor.watch_warnings(&event_loop));
    }
    if config.monitors.program_cache {
        handles.push_interval(programs.monitor(&event_loop));
    }
    if config.monitors.sketch_registry {
        handles.push_interval(registry.monitor());
    }

    let resolved = config.resolved_sketches();
    for entry in &resolved {
        let finish = monitor.measure_render_time(format!("mount:{}", entry.id));
        let sketch = demos::build(entry, &programs)?;
        registry.create(
            entry.id.clone(),
            sketch,
            Container::new(entry.container.clone(), entry.width, entry.height),
        );
        finish();
    }
    event_loop.dispatch_load();

    let sweep = start_pointer_sweep(&event_loop, &resolved);
    let duration = config.run_duration();
    tracing::info!(
        sketches = registry.count(),
        duration = %humantime::format_duration(duration),
        fps = config.frame_rate(),
        "exhibition running"
    );
    let turns = event_loop.run_for(duration, frame_period);
    event_loop.clear_interval(sweep);

    registry.log_summary();
    programs.log_summary();
    let warnings = monitor.check_performance_warnings();
    let metrics = monitor.all_metrics();
    let sketches = registry.count();

    let torn_down = registry.cleanup_all();
    let leftover = programs.cleanup(None);
    handles.cancel();
    tracing::info!(turns, torn_down, leftover_programs = leftover, "exhibition finished");

    Ok(RunReport {
        duration_ms: duration.as_secs_f64() * 1000.0,
        turns,
        sketches,
        torn_down,
        metrics,
        warnings,
        cache: programs.stats().into(),
    })
}

/// Moves a synthetic pointer on a Lissajous path across the largest canvas.
fn start_pointer_sweep(event_loop: &Rc<EventLoop>, sketches: &[ResolvedSketch]) -> IntervalId {
    let (width, height) = sketches
        .iter()
        .map(|s| (s.width as f32, s.height as f32))
        .fold((1.0_f32, 1.0_f32), |(w, h), (sw, sh)| (w.max(sw), h.max(sh)));
    let weak = Rc::downgrade(event_loop);
    let started = event_loop.now();
    event_loop.set_interval(POINTER_SWEEP_PERIOD, move |now| {
        let Some(event_loop) = weak.upgrade() else {
            return;
        };
        let t = now.saturating_sub(started).as_secs_f32();
        let x = width * (0.5 + 0.4 * (t * 0.9).sin());
        let y = height * (0.5 + 0.4 * (t * 1.3).cos());
        event_loop.dispatch(InputEvent::PointerMoved { x, y });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use artconfig::{SketchEntry, SketchKind};
    use scheduler::ManualClock;

    fn short_config(kinds: &[SketchKind]) -> ArtConfig {
        let mut config = ArtConfig::default();
        config.duration = Some(Duration::from_millis(400));
        config.fps = Some(50.0);
        config.sketches = kinds
            .iter()
            .map(|kind| SketchEntry {
                id: kind.as_str().to_string(),
                kind: *kind,
                container: None,
                width: Some(160),
                height: Some(120),
                fragment: None,
            })
            .collect();
        config
    }

    fn manual_loop() -> Rc<EventLoop> {
        Rc::new(EventLoop::new(Rc::new(ManualClock::new())))
    }

    #[test]
    fn exhibition_runs_and_leaves_nothing_behind() {
        let event_loop = manual_loop();
        let config = short_config(&SketchKind::ALL);
        let report = run_exhibition(&config, event_loop.clone()).unwrap();

        assert_eq!(report.sketches, 4);
        assert_eq!(report.torn_down, 4);
        assert_eq!(report.turns, 21);
        assert_eq!((report.cache.contexts, report.cache.programs), (0, 0));
        assert_eq!(report.cache.misses, 1);
        assert!(report.metrics.contains_key("mount:shader-field"));

        assert_eq!(event_loop.pending_frames(), 0);
        assert_eq!(event_loop.active_intervals(), 0);
        assert_eq!(event_loop.listeners(), 0);
    }

    #[test]
    fn unusable_frame_rate_is_an_error_not_a_panic() {
        let event_loop = manual_loop();
        let mut config = short_config(&[SketchKind::Noise]);
        config.fps = Some(1e-30);
        let err = run_exhibition(&config, event_loop.clone()).unwrap_err();
        assert!(format!("{err:#}").contains("frame rate"), "{err:#}");
        assert_eq!(event_loop.active_intervals(), 0);
        assert_eq!(event_loop.listeners(), 0);
    }

    #[test]
    fn development_mode_records_page_load_and_fps() {
        let event_loop = manual_loop();
        let mut config = short_config(&[SketchKind::Noise]);
        config.duration = Some(Duration::from_millis(1500));
        config.monitors.development = true;
        let report = run_exhibition(&config, event_loop.clone()).unwrap();

        assert!(report.metrics.contains_key("pageLoad"));
        let fps = report.metrics.get("fps").copied().unwrap_or_default();
        assert!((49.0..=51.0).contains(&fps), "fps = {fps}");
        assert_eq!(event_loop.active_intervals(), 0);
        assert_eq!(event_loop.pending_frames(), 0);
    }

    #[test]
    fn report_serializes_warnings_with_their_kind() {
        let report = RunReport {
            duration_ms: 10.0,
            turns: 1,
            sketches: 0,
            torn_down: 0,
            metrics: BTreeMap::new(),
            warnings: vec![PerformanceWarning::LowFps { fps: 12.0 }],
            cache: CacheStats::default().into(),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["warnings"][0]["kind"], "low_fps");
        assert_eq!(value["cache"]["programs"], 0);
    }
}
