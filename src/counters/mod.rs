//! Hardware performance counter handle.
//!
//! Exposes one `CounterHandle` enum over two backends chosen by
//! `crate::config::CounterBackend`: `perf_event_open`-based (the default,
//! `perf`) and a kernel-module-assisted one for environments where
//! `perf_event_open` is unavailable.

pub mod arch;
pub mod module;
pub mod perf;

use crate::config::CounterBackend;
use crate::error::CounterError;
use crate::record::CounterType;

use self::module::ModuleCounter;
use self::perf::PerfCounter;

/// A hardware counter opened for the calling thread.
///
/// `CounterType::TimeOnly` never produces a `CounterHandle`: callers
/// check for that case before opening one.
pub enum CounterHandle {
    Perf(PerfCounter),
    Module(ModuleCounter),
}

impl CounterHandle {
    /// Opens a counter for `counter_type` using `backend`.
    pub fn open(counter_type: CounterType, backend: CounterBackend) -> Result<Self, CounterError> {
        match backend {
            CounterBackend::Perf => PerfCounter::open(counter_type).map(CounterHandle::Perf),
            CounterBackend::KernelModule => {
                ModuleCounter::open(counter_type, 0).map(CounterHandle::Module)
            }
        }
    }

    /// Reads the current counter value.
    pub fn read(&self) -> Result<u64, CounterError> {
        match self {
            CounterHandle::Perf(c) => c.read(),
            CounterHandle::Module(c) => c.read(),
        }
    }
}
