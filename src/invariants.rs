//! Debug assertion macros for ring buffer and vector-clock invariants.
//!
//! Active only in debug builds (`#[cfg(debug_assertions)]`), zero overhead
//! in release builds.

/// Asserts that count never reaches capacity: one slot is always
/// sacrificed so two cursors alone can disambiguate full from empty.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count < $capacity,
            "ring count {} not below capacity {}",
            $count,
            $capacity
        )
    };
}

/// Asserts that a ring index is within bounds.
macro_rules! debug_assert_in_bounds {
    ($idx:expr, $capacity:expr) => {
        debug_assert!(
            $idx < $capacity,
            "ring index {} out of bounds for capacity {}",
            $idx,
            $capacity
        )
    };
}

/// Asserts a vector clock never exceeds `MAX_VECTORCLOCK_ENTRIES`.
macro_rules! debug_assert_clock_length {
    ($length:expr, $max:expr) => {
        debug_assert!(
            $length <= $max,
            "vector clock length {} exceeds max {}",
            $length,
            $max
        )
    };
}

pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_clock_length;
pub(crate) use debug_assert_in_bounds;
