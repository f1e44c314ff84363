//! SLA rules: a pluggable predicate deciding whether a record enters the
//! "exceeded" stream.

use crate::config::LONG_THRESHOLD_NS;
use crate::record::IntervalRecord;

/// A single SLA predicate, evaluated as a pure function of a finished
/// `IntervalRecord`.
pub trait SlaRule: Send + Sync {
    fn exceeds(&self, record: &IntervalRecord) -> bool;
}

/// The default rule: elapsed wall-clock time over a fixed threshold.
pub struct LongIntervalRule {
    threshold_ns: u64,
}

impl LongIntervalRule {
    pub const fn new(threshold_ns: u64) -> Self {
        Self { threshold_ns }
    }
}

impl Default for LongIntervalRule {
    fn default() -> Self {
        Self::new(LONG_THRESHOLD_NS)
    }
}

impl SlaRule for LongIntervalRule {
    fn exceeds(&self, record: &IntervalRecord) -> bool {
        record.elapsed_ns() > self.threshold_ns as f64
    }
}

/// An ordered set of SLA rules: a record is SLA-exceeding if any rule in
/// the set fires. Pluggable by design even though the current default
/// ships with exactly one rule.
pub struct SlaRules {
    rules: Vec<Box<dyn SlaRule>>,
}

impl SlaRules {
    pub fn new(rules: Vec<Box<dyn SlaRule>>) -> Self {
        Self { rules }
    }

    pub fn exceeds_slas(&self, record: &IntervalRecord) -> bool {
        self.rules.iter().any(|rule| rule.exceeds(record))
    }
}

impl Default for SlaRules {
    fn default() -> Self {
        Self::new(vec![Box::new(LongIntervalRule::default())])
    }
}
