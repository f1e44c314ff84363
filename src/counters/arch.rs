//! Per-architecture `(type, config)` lookup for the counters this crate
//! knows how to ask `perf_event_open` for.
//!
//! The hardware encodings below are the same raw event/umask pairs Linux
//! `perf stat` resolves its generic event names to; keeping them in one
//! table keeps the backend code architecture-agnostic.

use crate::record::CounterType;

/// `(perf_type_id, config)` pair passed straight into `perf_event_attr`.
#[derive(Debug, Clone, Copy)]
pub struct PerfEventId {
    pub perf_type: u32,
    pub config: u64,
}

const PERF_TYPE_HARDWARE: u32 = 0;
const PERF_TYPE_HW_CACHE: u32 = 3;

const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;

// PERF_COUNT_HW_CACHE_{LL,OP_READ,RESULT_ACCESS,RESULT_MISS} packed the way
// the kernel's `PERF_COUNT_HW_CACHE_*` config encoding expects:
// config = cache_id | (op_id << 8) | (result_id << 16).
const PERF_COUNT_HW_CACHE_LL: u64 = 2;
const PERF_COUNT_HW_CACHE_OP_READ: u64 = 0;
const PERF_COUNT_HW_CACHE_RESULT_ACCESS: u64 = 0;
const PERF_COUNT_HW_CACHE_RESULT_MISS: u64 = 1;

fn l3_config(result: u64) -> u64 {
    PERF_COUNT_HW_CACHE_LL | (PERF_COUNT_HW_CACHE_OP_READ << 8) | (result << 16)
}

/// Resolves a `CounterType` to the `perf_event_open` identifiers for the
/// running architecture.
///
/// Returns `None` for `CounterType::TimeOnly` (no hardware counter is
/// opened) and for `Invalid`. Also `None` for `L2Miss`: no per-arch
/// encoding is wired up for it yet, so a caller selecting it gets no
/// hardware counter rather than a wrong one.
pub fn resolve(counter_type: CounterType) -> Option<PerfEventId> {
    match counter_type {
        CounterType::TimeOnly => None,
        CounterType::UserspaceCycles => Some(PerfEventId {
            perf_type: PERF_TYPE_HARDWARE,
            config: PERF_COUNT_HW_CPU_CYCLES,
        }),
        CounterType::L3Reference => Some(PerfEventId {
            perf_type: PERF_TYPE_HW_CACHE,
            config: l3_config(PERF_COUNT_HW_CACHE_RESULT_ACCESS),
        }),
        CounterType::L3Miss => Some(PerfEventId {
            perf_type: PERF_TYPE_HW_CACHE,
            config: l3_config(PERF_COUNT_HW_CACHE_RESULT_MISS),
        }),
        CounterType::L2Miss => None,
        CounterType::Invalid => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_only_has_no_hw_counter() {
        assert!(resolve(CounterType::TimeOnly).is_none());
    }

    #[test]
    fn test_cycles_resolves_to_hardware_type() {
        let id = resolve(CounterType::UserspaceCycles).unwrap();
        assert_eq!(id.perf_type, PERF_TYPE_HARDWARE);
    }

    #[test]
    fn test_l3_reference_and_miss_differ_only_in_result_bits() {
        let reference = resolve(CounterType::L3Reference).unwrap();
        let miss = resolve(CounterType::L3Miss).unwrap();
        assert_eq!(reference.perf_type, miss.perf_type);
        assert_ne!(reference.config, miss.config);
    }

    #[test]
    fn test_l2_miss_has_no_hw_counter_yet() {
        assert!(resolve(CounterType::L2Miss).is_none());
    }
}
