use std::time::Duration;

use serde::Serialize;

/// Heap/process memory snapshot in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapUsage {
    pub used: u64,
    pub total: u64,
    pub limit: u64,
}

/// Navigation milestones measured from the host's time origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationTiming {
    pub fetch_start: Duration,
    pub load_event_end: Duration,
}

impl NavigationTiming {
    pub fn load_time(&self) -> Duration {
        self.load_event_end.saturating_sub(self.fetch_start)
    }
}

/// Optional introspection capabilities of the host environment.
///
/// Every method may report `None`; samplers that depend on a missing
/// capability disable themselves.
pub trait MetricsSource {
    fn heap_usage(&self) -> Option<HeapUsage> {
        None
    }

    fn navigation_timing(&self) -> Option<NavigationTiming> {
        None
    }
}

/// Source with no capabilities.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSource;

impl MetricsSource for NullSource {}

/// Reads the current process's memory from procfs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSource;

#[cfg(target_os = "linux")]
mod procfs {
    use super::HeapUsage;

    pub(super) fn read() -> Option<HeapUsage> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_status(&status, mem_total())
    }

    /// Resident and virtual size come from `VmRSS`/`VmSize`, which the
    /// kernel already reports in kB whatever the page size.
    pub(super) fn parse_status(status: &str, mem_total: Option<u64>) -> Option<HeapUsage> {
        let used = kib_field(status, "VmRSS:")?;
        let total = kib_field(status, "VmSize:")?;
        Some(HeapUsage {
            used,
            total,
            limit: mem_total.unwrap_or(total),
        })
    }

    fn mem_total() -> Option<u64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        kib_field(&meminfo, "MemTotal:")
    }

    /// Value of a `Key:   123 kB` line, in bytes.
    pub(super) fn kib_field(text: &str, key: &str) -> Option<u64> {
        let line = text.lines().find(|line| line.starts_with(key))?;
        let kib: u64 = line
            .trim_start_matches(key)
            .trim()
            .trim_end_matches("kB")
            .trim()
            .parse()
            .ok()?;
        Some(kib * 1024)
    }
}

impl MetricsSource for ProcessSource {
    #[cfg(target_os = "linux")]
    fn heap_usage(&self) -> Option<HeapUsage> {
        procfs::read()
    }
}

/// Fixed values, for hosts that inject their own measurements.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticSource {
    pub heap: Option<HeapUsage>,
    pub navigation: Option<NavigationTiming>,
}

impl MetricsSource for StaticSource {
    fn heap_usage(&self) -> Option<HeapUsage> {
        self.heap
    }

    fn navigation_timing(&self) -> Option<NavigationTiming> {
        self.navigation
    }
}
