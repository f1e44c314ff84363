//! Build-time configuration surface: root directory, schema version,
//! ring capacity, and hardware-counter backend selection.
//!
//! Exposes the knobs the external-interfaces section requires: root
//! directory, schema version, ring capacity, HW-counter backend, and the
//! per-architecture counter table (`crate::counters::arch`).

use std::env;
use std::path::PathBuf;

/// Schema version gating binary compatibility between producer and
/// consumer. Producers and consumers built against
/// different values never interoperate.
pub const SCHEMA_VERSION: &str = "4";

/// Maximum dense thread ids per process.
pub const MAX_THREADS: usize = 64;

/// Maximum vector-clock entries.
pub const MAX_VECTORCLOCK_ENTRIES: usize = 8;

/// Number of counters carried per `PerfRecord`. The current
/// spec fixes this at 1; widening it is a schema-breaking change.
pub const MAX_COUNTERS_PER_COUNTERTYPE: usize = 1;

/// Consumer channel-selection amortization window.
pub const SELECT_RECORDS_REUSE_COUNTER: u32 = 8;

/// Default SLA threshold: 100 microseconds.
pub const LONG_THRESHOLD_NS: u64 = 100_000;

/// Reserved budget; unused by the core today.
pub const MAX_NESTED_INTERVALS: usize = 4;

/// Default ring capacity per channel stream. Must be a power of two: the
/// SPSC ring masks indices rather than using modulo.
pub const DEFAULT_RECORD_QUEUE_SIZE: usize = 1024;

/// Which hardware-counter backend a process is built/configured to use
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterBackend {
    /// Kernel-assisted `perf_event_open` + mmap'd user page + `rdpmc`.
    Perf,
    /// Kernel-module pre-programmed MSR indices (constrained environments).
    KernelModule,
}

impl Default for CounterBackend {
    fn default() -> Self {
        CounterBackend::Perf
    }
}

/// Process-wide configuration for channel storage and counter backend.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory under which `<base_name>/<schema_version>/` is
    /// created.
    pub root: PathBuf,
    /// Ring capacity for both the `all` and `sla_exceeded` streams.
    pub ring_capacity: usize,
    /// Which HW-counter backend this process uses.
    pub counter_backend: CounterBackend,
    /// Whether sinks/sources track push/pop/discover/reap counters.
    /// Off by default: the counters cost a relaxed atomic increment per
    /// operation, which is unwanted overhead on the fast path unless a
    /// caller asked for it.
    pub enable_metrics: bool,
}

impl Config {
    /// Creates a configuration with explicit settings, metrics disabled.
    ///
    /// # Panics
    ///
    /// Panics if `ring_capacity` is zero or not a power of two.
    pub fn new(root: PathBuf, ring_capacity: usize, counter_backend: CounterBackend) -> Self {
        assert!(
            ring_capacity > 0 && ring_capacity.is_power_of_two(),
            "ring_capacity must be a power of two, got {ring_capacity}"
        );
        Self {
            root,
            ring_capacity,
            counter_backend,
            enable_metrics: false,
        }
    }

    /// Returns `self` with metrics tracking turned on.
    pub fn with_metrics(mut self) -> Self {
        self.enable_metrics = true;
        self
    }

    /// Builds the default configuration: root picked from
    /// `DDTRACE_ROOT`, else the first writable shared-memory filesystem
    /// among `/dev/shm` and `/tmp`.
    pub fn from_env() -> Self {
        let root = env::var_os("DDTRACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(default_root);
        Self::new(root, DEFAULT_RECORD_QUEUE_SIZE, CounterBackend::Perf)
    }

    /// Full path to `<root>/<base_name>/<schema_version>/`.
    pub fn schema_dir(&self, base_name: &str) -> PathBuf {
        self.root.join(base_name).join(SCHEMA_VERSION)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn default_root() -> PathBuf {
    for candidate in ["/dev/shm", "/tmp"] {
        let path = PathBuf::from(candidate);
        if path.is_dir() {
            return path;
        }
    }
    PathBuf::from("/tmp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_accepts_power_of_two() {
        let cfg = Config::new(PathBuf::from("/tmp"), 1024, CounterBackend::Perf);
        assert_eq!(cfg.ring_capacity, 1024);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_config_new_rejects_non_power_of_two() {
        let _ = Config::new(PathBuf::from("/tmp"), 1000, CounterBackend::Perf);
    }

    #[test]
    fn test_schema_dir_includes_version() {
        let cfg = Config::new(PathBuf::from("/tmp"), 16, CounterBackend::Perf);
        let dir = cfg.schema_dir("myapp");
        assert_eq!(dir, PathBuf::from("/tmp/myapp/4"));
    }

    #[test]
    fn test_metrics_disabled_by_default_enabled_via_with_metrics() {
        let cfg = Config::new(PathBuf::from("/tmp"), 16, CounterBackend::Perf);
        assert!(!cfg.enable_metrics);
        assert!(cfg.with_metrics().enable_metrics);
    }
}
