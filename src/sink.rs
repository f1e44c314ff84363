//! RecordSink: the producer side of one channel, owned exclusively by
//! the thread that created it.

use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::ptr::NonNull;

use log::{trace, warn};

use crate::beacon::ChannelsVersion;
use crate::clock::cycles_per_sec;
use crate::config::Config;
use crate::error::SinkInitError;
use crate::layout;
use crate::metrics::{SinkMetrics, SinkMetricsSnapshot};
use crate::record::{IntervalRecord, PerfRecord, RecordStorage};
use crate::sla::SlaRules;
use crate::vector_clock::VectorClock;

const RING_CAPACITY: usize = crate::config::DEFAULT_RECORD_QUEUE_SIZE;

/// The producer side of one channel file.
///
/// Exclusively owned by the thread that initialized it: its lifetime is
/// the thread's lifetime. On drop the mapping is released but the file
/// is left behind — the consumer reaps it.
pub struct RecordSink {
    storage: NonNull<RecordStorage<RING_CAPACITY>>,
    // Kept open for this sink's entire lifetime: the consumer's liveness
    // probe counts open file descriptions against the channel file, and
    // needs this producer-side handle to tell a live producer apart from
    // one that has already exited.
    file: File,
    path: PathBuf,
    server_id: u16,
    metrics: SinkMetrics,
    metrics_enabled: bool,
}

// SAFETY: `storage` is written only by the thread that owns this
// `RecordSink`; the type is not `Sync` by accident of that discipline,
// and is `Send` only in the narrow sense that the owning thread may
// itself migrate, which this crate's registry never does in practice.
unsafe impl Send for RecordSink {}

impl RecordSink {
    /// Initializes a new channel file under `config`'s root for
    /// `base_name`, maps it, and publishes it to the consumer.
    ///
    /// Every failure here is fatal: initialization failures must never
    /// be silently retried by the fast path.
    pub fn init(config: &Config, base_name: &str, server_id: u16) -> Result<Self, SinkInitError> {
        let schema_dir = layout::ensure_schema_dir(&config.root, base_name, crate::config::SCHEMA_VERSION)?;

        let size = std::mem::size_of::<RecordStorage<RING_CAPACITY>>();
        let (file, tmp_path) = layout::create_tmp_file(&schema_dir, size)?;

        // SAFETY: `file` was just truncated to exactly `size` bytes.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(crate::error::LayoutError::map(
                tmp_path.display().to_string(),
                std::io::Error::last_os_error(),
            )
            .into());
        }

        // SAFETY: `raw` points to `size` bytes of freshly-mapped, zeroed
        // (fresh file) memory; constructing a `RecordStorage` in place
        // here happens strictly before `publish` makes the file visible.
        unsafe {
            std::ptr::write(raw.cast(), RecordStorage::<RING_CAPACITY>::new());
        }

        let rec_path = layout::publish(&tmp_path)?;

        let beacon = ChannelsVersion::open(&schema_dir)?;
        beacon.bump();

        trace!("sink {} initialized for server_id={server_id}", rec_path.display());

        Ok(Self {
            // SAFETY: `mmap` returned non-null on success.
            storage: unsafe { NonNull::new_unchecked(raw.cast()) },
            file,
            path: rec_path,
            server_id,
            metrics: SinkMetrics::new(),
            metrics_enabled: config.enable_metrics,
        })
    }

    fn storage(&self) -> &RecordStorage<RING_CAPACITY> {
        // SAFETY: the mapping lives for `self`'s entire lifetime and is
        // written only by this thread (the sole producer).
        unsafe { self.storage.as_ref() }
    }

    /// Records one interval into the `all` ring, and into `sla_exceeded`
    /// too if `sla_rules` judges it so.
    ///
    /// A silent no-op while [`crate::registry::set_enabled`] has turned
    /// recording off process-wide.
    ///
    /// Never blocks and never fails audibly: a full ring silently drops
    /// the record.
    pub fn record_interval_end(
        &self,
        start_cycles: u64,
        end_cycles: u64,
        counters_diff: PerfRecord,
        clock: &VectorClock,
        sla_rules: &SlaRules,
    ) {
        if !crate::registry::is_enabled() {
            return;
        }

        let record = IntervalRecord {
            start_cycles,
            end_cycles,
            clock: *clock,
            server_id: self.server_id,
            cycles_per_sec: cycles_per_sec(),
            counters_diff,
        };

        if self.storage().all.push(record).is_err() {
            if self.metrics_enabled {
                self.metrics.record_dropped();
            }
            warn!("channel {} 'all' ring full, dropping record", self.path.display());
        } else if self.metrics_enabled {
            self.metrics.record_pushed();
        }

        if sla_rules.exceeds_slas(&record) {
            if self.storage().sla_exceeded.push(record).is_err() {
                if self.metrics_enabled {
                    self.metrics.sla_exceeded_dropped();
                }
                warn!(
                    "channel {} 'sla_exceeded' ring full, dropping record",
                    self.path.display()
                );
            } else if self.metrics_enabled {
                self.metrics.sla_exceeded_pushed();
            }
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Number of records currently queued in the `all` ring. Diagnostic
    /// only: the consumer is the only intended reader of channel
    /// contents.
    pub fn all_len(&self) -> usize {
        self.storage().all.len()
    }

    /// A snapshot of this sink's push/drop counters.
    pub fn metrics(&self) -> SinkMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for RecordSink {
    fn drop(&mut self) {
        let size = std::mem::size_of::<RecordStorage<RING_CAPACITY>>();
        // SAFETY: `self.storage` was obtained from `mmap` of exactly
        // `size` bytes in `init` and is unmapped exactly once, here. The
        // backing file is intentionally left on disk for the consumer.
        unsafe {
            libc::munmap(self.storage.as_ptr().cast(), size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CounterBackend;
    use crate::record::CounterType;
    use crate::vector_clock::VectorClock;
    use tempfile::tempdir;

    #[test]
    fn test_init_publishes_rec_file() {
        let root = tempdir().unwrap();
        let config = Config::new(root.path().to_path_buf(), 16, CounterBackend::Perf);
        let sink = RecordSink::init(&config, "sink_test", 1).unwrap();
        assert!(sink.path().file_name().unwrap().to_str().unwrap().starts_with("rec_"));
        assert!(sink.path().exists());
    }

    #[test]
    fn test_metrics_track_pushes_and_drops() {
        let root = tempdir().unwrap();
        let config = Config::new(root.path().to_path_buf(), 2, CounterBackend::Perf).with_metrics();
        let sink = RecordSink::init(&config, "metrics_test", 1).unwrap();
        let sla_rules = SlaRules::new(vec![]);
        let clock = VectorClock::new(1);

        // capacity is 1 (N=2, one slot sacrificed); the second push drops.
        sink.record_interval_end(0, 1, PerfRecord::zeroed(CounterType::TimeOnly), &clock, &sla_rules);
        sink.record_interval_end(0, 1, PerfRecord::zeroed(CounterType::TimeOnly), &clock, &sla_rules);

        let snap = sink.metrics();
        assert_eq!(snap.records_pushed, 1);
        assert_eq!(snap.records_dropped, 1);
        assert_eq!(snap.sla_exceeded_pushed, 0);
        assert_eq!(snap.sla_exceeded_dropped, 0);
    }
}
