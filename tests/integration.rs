use ddtrace::{
    CounterBackend, CounterType, IntervalRecord, PerfRecord, RecordSink, RecordSource, SlaRules,
    VectorClock,
};
use tempfile::tempdir;

fn config(root: &std::path::Path) -> ddtrace::Config {
    let _ = env_logger::builder().is_test(true).try_init();
    ddtrace::Config::new(root.to_path_buf(), 16, CounterBackend::Perf)
}

fn clock_with(id: u64, server_id: u16, count: u8) -> VectorClock {
    let mut clock = VectorClock::new(id);
    for _ in 0..count {
        clock.increment(server_id);
    }
    clock
}

/// S1: three intervals pushed with increasing clock counts are popped in
/// the same order, byte-identical.
#[test]
fn s1_fifo_order_preserved_byte_identical() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());
    let sink = RecordSink::init(&cfg, "s1", 7).unwrap();
    let sla_rules = SlaRules::default();

    let clocks = [
        clock_with(1, 7, 1),
        clock_with(1, 7, 2),
        clock_with(1, 7, 3),
    ];
    for (i, clock) in clocks.iter().enumerate() {
        sink.record_interval_end(
            i as u64 * 10,
            i as u64 * 10 + 5,
            PerfRecord::zeroed(CounterType::TimeOnly),
            clock,
            &sla_rules,
        );
    }

    let mut source = RecordSource::init(&cfg, "s1").unwrap();
    for (i, expected_clock) in clocks.iter().enumerate() {
        let mut out = IntervalRecord::zeroed();
        assert!(source.pop_record(&mut out), "expected record {i}");
        assert_eq!(out.start_cycles, i as u64 * 10);
        assert_eq!(out.end_cycles, i as u64 * 10 + 5);
        assert_eq!(out.server_id, 7);
        assert_eq!(out.clock, *expected_clock);
    }

    let mut out = IntervalRecord::zeroed();
    assert!(!source.pop_record(&mut out));
}

/// S2: pushing past ring capacity silently drops the overflow; exactly
/// `capacity` records survive in FIFO order.
#[test]
fn s2_overflow_drops_excess_fifo_survives() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());
    let sink = RecordSink::init(&cfg, "s2", 1).unwrap();
    let sla_rules = SlaRules::default();
    let clock = VectorClock::new(1);

    for i in 0..20u64 {
        sink.record_interval_end(i, i + 1, PerfRecord::zeroed(CounterType::TimeOnly), &clock, &sla_rules);
    }

    let mut source = RecordSource::init(&cfg, "s2").unwrap();
    let mut popped = Vec::new();
    let mut out = IntervalRecord::zeroed();
    while source.pop_record(&mut out) {
        popped.push(out.start_cycles);
    }

    // capacity 16 sacrifices one slot => at most 15 survive.
    assert_eq!(popped.len(), 15);
    assert_eq!(popped, (0u64..15).collect::<Vec<_>>());
}

/// S3: two independent sinks interleave into the same consumer, each
/// preserving its own FIFO order, all records eventually observed.
#[test]
fn s3_multi_producer_round_robin_preserves_per_channel_fifo() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());
    let sla_rules = SlaRules::default();
    let clock_a = VectorClock::new(1);
    let clock_b = VectorClock::new(2);

    let sink_a = RecordSink::init(&cfg, "s3", 1).unwrap();
    let sink_b = RecordSink::init(&cfg, "s3", 2).unwrap();

    for i in 0..5u64 {
        sink_a.record_interval_end(i, i, PerfRecord::zeroed(CounterType::TimeOnly), &clock_a, &sla_rules);
        sink_b.record_interval_end(100 + i, 100 + i, PerfRecord::zeroed(CounterType::TimeOnly), &clock_b, &sla_rules);
    }

    let mut source = RecordSource::init(&cfg, "s3").unwrap();
    assert_eq!(source.open_channel_count(), 2);

    let mut from_a = Vec::new();
    let mut from_b = Vec::new();
    let mut out = IntervalRecord::zeroed();
    for _ in 0..200 {
        if !source.pop_record(&mut out) {
            continue;
        }
        if out.server_id == 1 {
            from_a.push(out.start_cycles);
        } else {
            from_b.push(out.start_cycles);
        }
        if from_a.len() == 5 && from_b.len() == 5 {
            break;
        }
    }

    assert_eq!(from_a, vec![0, 1, 2, 3, 4]);
    assert_eq!(from_b, vec![100, 101, 102, 103, 104]);
}

/// S4: an interval under the SLA threshold is absent from
/// `sla_exceeded`; one over it is present in both streams.
#[test]
fn s4_sla_rule_classifies_long_and_short_intervals() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());
    let sink = RecordSink::init(&cfg, "s4", 1).unwrap();
    let sla_rules = SlaRules::default();
    let clock = VectorClock::new(1);

    let cycles_per_sec = ddtrace::clock::cycles_per_sec();
    let short_end = (50_000.0 / 1_000_000_000.0 * cycles_per_sec) as u64;
    let long_end = (200_000.0 / 1_000_000_000.0 * cycles_per_sec) as u64;

    sink.record_interval_end(0, short_end, PerfRecord::zeroed(CounterType::TimeOnly), &clock, &sla_rules);
    sink.record_interval_end(0, long_end, PerfRecord::zeroed(CounterType::TimeOnly), &clock, &sla_rules);

    let mut source = RecordSource::init(&cfg, "s4").unwrap();

    let mut all = Vec::new();
    let mut out = IntervalRecord::zeroed();
    while source.pop_record(&mut out) {
        all.push(out.end_cycles);
    }
    assert_eq!(all, vec![short_end, long_end]);

    let mut exceeded = Vec::new();
    while source.pop_sla_exceeded_record(&mut out) {
        exceeded.push(out.end_cycles);
    }
    assert_eq!(exceeded, vec![long_end]);
}

/// S5: the consumer starts before any producer; its first poll observes
/// nothing, then a rescan after the producer publishes picks up the
/// first record.
#[test]
fn s5_discovery_after_consumer_starts_first() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());

    let mut source = RecordSource::init(&cfg, "s5").unwrap();
    let mut out = IntervalRecord::zeroed();
    assert!(!source.pop_record(&mut out));

    let sink = RecordSink::init(&cfg, "s5", 3).unwrap();
    let sla_rules = SlaRules::default();
    let clock = VectorClock::new(9);
    sink.record_interval_end(1, 2, PerfRecord::zeroed(CounterType::TimeOnly), &clock, &sla_rules);

    source.update_channels();
    assert!(source.pop_record(&mut out));
    assert_eq!(out.server_id, 3);
}

/// S6: once a producer's channel is abandoned (its sink dropped without
/// the consumer having reaped it), the consumer still drains every
/// record that was written, then reaps the file on the next cleanup
/// pass; other channels are unaffected.
#[test]
fn s6_liveness_reap_after_producer_gone() {
    let dir = tempdir().unwrap();
    let cfg = config(dir.path());
    let sla_rules = SlaRules::default();
    let clock = VectorClock::new(1);

    {
        let sink = RecordSink::init(&cfg, "s6", 1).unwrap();
        for i in 0..3u64 {
            sink.record_interval_end(i, i, PerfRecord::zeroed(CounterType::TimeOnly), &clock, &sla_rules);
        }
        // sink dropped here: unmapped, file left behind, as if the
        // producer process had crashed.
    }
    let other_sink = RecordSink::init(&cfg, "s6", 2).unwrap();
    other_sink.record_interval_end(99, 99, PerfRecord::zeroed(CounterType::TimeOnly), &clock, &sla_rules);

    let mut source = RecordSource::init(&cfg, "s6").unwrap();
    assert_eq!(source.open_channel_count(), 2);

    let mut drained_dead = 0;
    let mut out = IntervalRecord::zeroed();
    while drained_dead < 3 {
        if source.pop_record(&mut out) && out.server_id == 1 {
            drained_dead += 1;
        }
    }
    assert_eq!(drained_dead, 3);

    source.cleanup_dead_channels();
    assert_eq!(source.open_channel_count(), 1);

    let mut still_works = false;
    for _ in 0..50 {
        if source.pop_record(&mut out) && out.server_id == 2 {
            still_works = true;
            break;
        }
    }
    assert!(still_works);
}
