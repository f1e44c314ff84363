//! Interval handle: a scoped RAII-style start/stop/checkpoint/abort
//! driver sitting atop the hardware counter handle and the record sink.

use crate::clock::read_cycles;
use crate::counters::CounterHandle;
use crate::record::{CounterType, PerfRecord};
use crate::sink::RecordSink;
use crate::sla::SlaRules;
use crate::vector_clock::VectorClock;

enum State {
    Stopped,
    Running { start_cycles: u64, start_counter: u64 },
}

/// A scoped measurement. `Stopped` is the initial state; `start()` moves
/// it to `Running`; `stop()`, `checkpoint()`, and `abort()` all leave it
/// `Stopped` (checkpoint immediately re-enters `Running`). Dropping a
/// `Running` handle behaves like `stop()`.
///
/// If no clock is ever attached, the handle is inert: it still tracks
/// state transitions but never delivers a record, matching the "no
/// clock means no record" rule a caller relies on when it cannot yet
/// determine which request an interval belongs to.
pub struct Interval<'a> {
    sink: &'a RecordSink,
    counter: Option<&'a CounterHandle>,
    counter_type: CounterType,
    sla_rules: &'a SlaRules,
    clock: Option<&'a mut VectorClock>,
    server_id: u16,
    state: State,
}

impl<'a> Interval<'a> {
    /// Creates a new, stopped handle with no clock attached. `server_id`
    /// is the process-wide logical id this interval's increments are
    /// attributed to.
    pub fn new(
        sink: &'a RecordSink,
        counter: Option<&'a CounterHandle>,
        counter_type: CounterType,
        sla_rules: &'a SlaRules,
        server_id: u16,
    ) -> Self {
        Self {
            sink,
            counter,
            counter_type,
            sla_rules,
            clock: None,
            server_id,
            state: State::Stopped,
        }
    }

    /// Attaches a clock, but only if none is set yet.
    pub fn set_clock(&mut self, clock: &'a mut VectorClock) {
        if self.clock.is_none() {
            self.clock = Some(clock);
        }
    }

    fn read_counter(&self) -> u64 {
        self.counter.and_then(|c| c.read().ok()).unwrap_or(0)
    }

    /// `Stopped -> Running`. No-op if already running.
    pub fn start(&mut self) {
        if matches!(self.state, State::Running { .. }) {
            return;
        }
        self.state = State::Running {
            start_cycles: read_cycles(),
            start_counter: self.read_counter(),
        };
    }

    /// `Stopped -> Running`, attaching `clock` at the same time as
    /// `set_clock` would.
    pub fn start_with_clock(&mut self, clock: &'a mut VectorClock) {
        self.set_clock(clock);
        self.start();
    }

    /// `Running -> Stopped`: computes the diff, increments the attached
    /// clock, and delivers one record. A no-op if not running; delivers
    /// no record if no clock is attached.
    pub fn stop(&mut self) {
        let State::Running { start_cycles, start_counter } = self.state else {
            return;
        };
        self.state = State::Stopped;
        let now_counter = self.read_counter();
        self.deliver(start_cycles, read_cycles(), start_counter, now_counter);
    }

    /// `Running -> Running`: delivers a record for `[start, now)`, then
    /// immediately starts a new interval with `start = now`, reusing the
    /// just-read counter snapshot rather than reading it twice.
    ///
    /// Increments the clock once, for the interval being closed; the
    /// newly opened interval starts from that already-incremented clock
    /// state rather than incrementing a second time.
    pub fn checkpoint(&mut self) {
        let State::Running { start_cycles, start_counter } = self.state else {
            return;
        };
        let now_cycles = read_cycles();
        let now_counter = self.read_counter();
        self.deliver(start_cycles, now_cycles, start_counter, now_counter);
        self.state = State::Running {
            start_cycles: now_cycles,
            start_counter: now_counter,
        };
    }

    /// `Running -> Stopped`: discards the in-flight measurement without
    /// delivering a record. The escape hatch for exceptional control
    /// flow so a half-built interval never reaches the sink.
    pub fn abort(&mut self) {
        self.state = State::Stopped;
    }

    fn deliver(&mut self, start_cycles: u64, end_cycles: u64, start_counter: u64, end_counter: u64) {
        let Some(clock) = self.clock.as_deref_mut() else {
            return;
        };

        let start = PerfRecord {
            counters: [start_counter],
            counter_type: self.counter_type,
        };
        let end = PerfRecord {
            counters: [end_counter],
            counter_type: self.counter_type,
        };
        let counters_diff = PerfRecord::subtract(&start, &end);

        clock.increment(self.server_id);
        self.sink
            .record_interval_end(start_cycles, end_cycles, counters_diff, clock, self.sla_rules);
    }
}

impl Drop for Interval<'_> {
    fn drop(&mut self) {
        if let State::Running { start_cycles, start_counter } = self.state {
            self.state = State::Stopped;
            let now_counter = self.read_counter();
            self.deliver(start_cycles, read_cycles(), start_counter, now_counter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::tempdir;

    fn make_sink(root: &std::path::Path) -> RecordSink {
        let config = Config::new(root.to_path_buf(), 16, crate::config::CounterBackend::Perf);
        RecordSink::init(&config, "interval_test", 1).unwrap()
    }

    #[test]
    fn test_inert_without_clock_delivers_nothing() {
        let dir = tempdir().unwrap();
        let sink = make_sink(dir.path());
        let sla_rules = SlaRules::default();
        let mut interval = Interval::new(&sink, None, CounterType::TimeOnly, &sla_rules, 1);

        interval.start();
        interval.stop();

        assert!(sink.all_len() == 0);
    }

    #[test]
    fn test_start_stop_with_clock_delivers_one_record() {
        let dir = tempdir().unwrap();
        let sink = make_sink(dir.path());
        let sla_rules = SlaRules::default();
        let mut clock = VectorClock::new(42);
        {
            let mut interval = Interval::new(&sink, None, CounterType::TimeOnly, &sla_rules, 1);
            interval.set_clock(&mut clock);
            interval.start();
            interval.stop();
        }
        assert_eq!(clock.length, 1);
        assert_eq!(sink.all_len(), 1);
    }

    #[test]
    fn test_abort_delivers_nothing() {
        let dir = tempdir().unwrap();
        let sink = make_sink(dir.path());
        let sla_rules = SlaRules::default();
        let mut clock = VectorClock::new(1);
        let mut interval = Interval::new(&sink, None, CounterType::TimeOnly, &sla_rules, 1);
        interval.set_clock(&mut clock);
        interval.start();
        interval.abort();

        assert_eq!(clock.length, 0);
        assert_eq!(sink.all_len(), 0);
    }

    #[test]
    fn test_checkpoint_delivers_and_keeps_running() {
        let dir = tempdir().unwrap();
        let sink = make_sink(dir.path());
        let sla_rules = SlaRules::default();
        let mut clock = VectorClock::new(1);
        let mut interval = Interval::new(&sink, None, CounterType::TimeOnly, &sla_rules, 1);
        interval.set_clock(&mut clock);
        interval.start();
        interval.checkpoint();
        interval.stop();

        assert_eq!(clock.entries[0].count, 2);
    }

    #[test]
    fn test_drop_while_running_delivers_record() {
        let dir = tempdir().unwrap();
        let sink = make_sink(dir.path());
        let sla_rules = SlaRules::default();
        let mut clock = VectorClock::new(1);
        {
            let mut interval = Interval::new(&sink, None, CounterType::TimeOnly, &sla_rules, 1);
            interval.set_clock(&mut clock);
            interval.start();
        }
        assert_eq!(clock.length, 1);
        assert_eq!(sink.all_len(), 1);
    }
}
