//! Cycle clock (component A): a monotonic hardware cycle counter with
//! ns/us/s conversion, calibrated once per process.

use std::sync::OnceLock;
use std::time::Instant;

/// Reads the raw, monotonic cycle counter.
///
/// On x86_64 this is `rdtsc`; on aarch64 the generic virtual counter
/// register; other targets fall back to a nanosecond `Instant` reading
/// scaled to look like a cycle count at 1 GHz, which keeps diffs and
/// conversions correct even though there is no real hardware counter.
#[inline]
pub fn read_cycles() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: `rdtsc` has no preconditions; it is always available on
        // any x86_64 CPU this crate targets.
        unsafe { core::arch::x86_64::_rdtsc() }
    }
    #[cfg(target_arch = "aarch64")]
    {
        let cntvct: u64;
        // SAFETY: reading `cntvct_el0` is always permitted from userspace.
        unsafe {
            core::arch::asm!("mrs {}, cntvct_el0", out(reg) cntvct);
        }
        cntvct
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        fallback_cycles()
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn fallback_cycles() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

/// Calibrates and caches the process-wide cycles-per-second figure by
/// busy-waiting a short, fixed interval against a wall-clock `Instant`
/// and counting cycle-counter ticks elapsed.
///
/// This is captured once per process and stamped onto every
/// `IntervalRecord` so a consumer can convert cycle deltas to wall time
/// without any ambient state of its own.
pub fn cycles_per_sec() -> f64 {
    static CALIBRATED: OnceLock<f64> = OnceLock::new();
    *CALIBRATED.get_or_init(calibrate)
}

fn calibrate() -> f64 {
    const CALIBRATION_DURATION_NS: u128 = 20_000_000; // 20ms

    let start_wall = Instant::now();
    let start_cycles = read_cycles();

    while start_wall.elapsed().as_nanos() < CALIBRATION_DURATION_NS {
        std::hint::spin_loop();
    }

    let elapsed_ns = start_wall.elapsed().as_nanos().max(1) as f64;
    let elapsed_cycles = read_cycles().wrapping_sub(start_cycles) as f64;

    elapsed_cycles * 1_000_000_000.0 / elapsed_ns
}

/// Converts a cycle delta to nanoseconds using the process's calibrated
/// `cycles_per_sec`.
#[inline]
pub fn cycles_to_ns(cycles: u64, cycles_per_sec: f64) -> f64 {
    if cycles_per_sec <= 0.0 {
        return 0.0;
    }
    cycles as f64 * 1_000_000_000.0 / cycles_per_sec
}

/// Converts a cycle delta to microseconds.
#[inline]
pub fn cycles_to_us(cycles: u64, cycles_per_sec: f64) -> f64 {
    cycles_to_ns(cycles, cycles_per_sec) / 1_000.0
}

/// Converts a cycle delta to seconds.
#[inline]
pub fn cycles_to_s(cycles: u64, cycles_per_sec: f64) -> f64 {
    cycles_to_ns(cycles, cycles_per_sec) / 1_000_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_monotonic_ish() {
        let a = read_cycles();
        let b = read_cycles();
        // Not strictly monotonic across cores, but on one thread in
        // sequence it should not regress by more than noise would allow.
        assert!(b >= a || a - b < 1_000_000);
    }

    #[test]
    fn test_conversion_roundtrip() {
        let cps = 1_000_000_000.0; // pretend 1GHz
        assert!((cycles_to_ns(1_000_000_000, cps) - 1_000_000_000.0).abs() < 1.0);
        assert!((cycles_to_us(1_000_000_000, cps) - 1_000_000.0).abs() < 1.0);
        assert!((cycles_to_s(1_000_000_000, cps) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_conversion_zero_cps_is_safe() {
        assert_eq!(cycles_to_ns(123, 0.0), 0.0);
    }

    #[test]
    fn test_cycles_per_sec_is_plausible() {
        let cps = cycles_per_sec();
        assert!(cps > 1_000_000.0, "calibrated frequency implausibly low: {cps}");
    }
}
