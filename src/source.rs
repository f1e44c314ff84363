//! RecordSource (consumer): discovers, opens, round-robins over, and
//! reaps channels.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::ptr::NonNull;

use log::{debug, warn};

use crate::backoff::Backoff;
use crate::beacon::ChannelsVersion;
use crate::config::{Config, SELECT_RECORDS_REUSE_COUNTER};
use crate::error::SourceInitError;
use crate::layout;
use crate::metrics::{SourceMetrics, SourceMetricsSnapshot};
use crate::record::{IntervalRecord, RecordStorage};

const RING_CAPACITY: usize = crate::config::DEFAULT_RECORD_QUEUE_SIZE;

struct OpenChannel {
    path: PathBuf,
    // Kept open only so the liveness probe has a `(dev, ino)` to compare
    // against; the mapping itself does not need the fd afterward. The
    // producer's `RecordSink` keeps its own fd open too, so a live
    // channel always shows at least two references system-wide.
    file: File,
    storage: NonNull<RecordStorage<RING_CAPACITY>>,
}

impl OpenChannel {
    fn open(path: PathBuf) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = std::mem::size_of::<RecordStorage<RING_CAPACITY>>();

        // SAFETY: `file` is a `rec_*` channel file, published only once
        // its producer has fully initialized a `RecordStorage` in it.
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
            return Err(std::io::Error::last_os_error());
        }

        Ok(Self {
            path,
            file,
            // SAFETY: `mmap` returned non-null on success.
            storage: unsafe { NonNull::new_unchecked(raw.cast()) },
        })
    }

    fn storage(&self) -> &RecordStorage<RING_CAPACITY> {
        // SAFETY: the mapping lives for as long as this `OpenChannel`
        // does; only the consumer reads through it here, and only the
        // indices this consumer itself owns (`head` of each ring) are
        // ever written back through this reference.
        unsafe { self.storage.as_ref() }
    }
}

impl Drop for OpenChannel {
    fn drop(&mut self) {
        let size = std::mem::size_of::<RecordStorage<RING_CAPACITY>>();
        // SAFETY: mapped with exactly `size` bytes in `open`, unmapped
        // exactly once, here.
        unsafe {
            libc::munmap(self.storage.as_ptr().cast(), size);
        }
    }
}

/// The consumer side: owns every currently-open channel mapping,
/// discovers new ones via the beacon, and reaps dead ones.
///
/// Must be driven from a single thread: channel selection and the
/// liveness probe are not internally synchronized, matching the
/// single-consumer precondition every channel's ring relies on.
pub struct RecordSource {
    schema_dir: PathBuf,
    beacon: ChannelsVersion,
    cached_version: u64,
    channels: Vec<OpenChannel>,
    round_robin_idx: usize,
    reuse_counter: u32,
    metrics: SourceMetrics,
    metrics_enabled: bool,
}

impl RecordSource {
    /// Opens (creating if necessary) the schema directory and beacon,
    /// then runs an initial channel scan.
    pub fn init(config: &Config, base_name: &str) -> Result<Self, SourceInitError> {
        let schema_dir = layout::ensure_schema_dir(&config.root, base_name, crate::config::SCHEMA_VERSION)?;
        let beacon = ChannelsVersion::open(&schema_dir)?;

        let mut source = Self {
            schema_dir,
            beacon,
            cached_version: 0,
            channels: Vec::new(),
            round_robin_idx: 0,
            reuse_counter: 0,
            metrics: SourceMetrics::new(),
            metrics_enabled: config.enable_metrics,
        };
        source.update_channels();
        Ok(source)
    }

    /// Enumerates `rec_*` files, opens any not already tracked, and
    /// refreshes the cached beacon version. Resets the round-robin
    /// iterator if the channel set changed.
    pub fn update_channels(&mut self) {
        self.cached_version = self.beacon.current();

        let Ok(files) = layout::list_channel_files(&self.schema_dir) else {
            return;
        };

        let mut changed = false;
        for path in files {
            if self.channels.iter().any(|c| c.path == path) {
                continue;
            }
            match OpenChannel::open(path.clone()) {
                Ok(channel) => {
                    debug!("discovered channel {}", path.display());
                    self.channels.push(channel);
                    if self.metrics_enabled {
                        self.metrics.channel_discovered();
                    }
                    changed = true;
                }
                Err(e) => {
                    warn!("failed to open channel {}: {e}", path.display());
                }
            }
        }

        if changed {
            self.round_robin_idx = 0;
            self.reuse_counter = 0;
        }
    }

    /// Applies the liveness probe to every open channel; unmaps and
    /// unlinks any that are dead.
    pub fn cleanup_dead_channels(&mut self) {
        let mut dead_indices = Vec::new();
        for (idx, channel) in self.channels.iter().enumerate() {
            if is_dead(&channel.file) {
                dead_indices.push(idx);
            }
        }

        if dead_indices.is_empty() {
            return;
        }

        for idx in dead_indices.into_iter().rev() {
            let channel = self.channels.remove(idx);
            debug!("reaping dead channel {}", channel.path.display());
            let _ = fs::remove_file(&channel.path);
            if self.metrics_enabled {
                self.metrics.channel_reaped();
            }
        }
        self.round_robin_idx = 0;
        self.reuse_counter = 0;
    }

    fn rescan_if_beacon_moved(&mut self) {
        if self.beacon.current() != self.cached_version {
            self.update_channels();
        }
    }

    /// Advances the round-robin pointer every `SELECT_RECORDS_REUSE_COUNTER`
    /// calls; returns the currently-selected channel index, or `None` if
    /// no channel is open.
    fn select_channel(&mut self) -> Option<usize> {
        self.rescan_if_beacon_moved();

        if self.channels.is_empty() {
            return None;
        }

        if self.round_robin_idx >= self.channels.len() {
            self.round_robin_idx = 0;
        }

        self.reuse_counter += 1;
        if self.reuse_counter >= SELECT_RECORDS_REUSE_COUNTER {
            self.reuse_counter = 0;
            self.round_robin_idx = (self.round_robin_idx + 1) % self.channels.len();
        }

        Some(self.round_robin_idx)
    }

    /// Pops one record from the `all` ring of the currently-selected
    /// channel. Returns `false` if no channel is open or that channel's
    /// ring is empty; a single call only ever inspects one channel.
    pub fn pop_record(&mut self, out: &mut IntervalRecord) -> bool {
        let Some(idx) = self.select_channel() else {
            return false;
        };
        match self.channels[idx].storage().all.pop() {
            Some(record) => {
                *out = record;
                if self.metrics_enabled {
                    self.metrics.record_popped();
                }
                true
            }
            None => false,
        }
    }

    /// Like [`Self::pop_record`], but from the `sla_exceeded` ring.
    pub fn pop_sla_exceeded_record(&mut self, out: &mut IntervalRecord) -> bool {
        let Some(idx) = self.select_channel() else {
            return false;
        };
        match self.channels[idx].storage().sla_exceeded.pop() {
            Some(record) => {
                *out = record;
                if self.metrics_enabled {
                    self.metrics.record_popped();
                }
                true
            }
            None => false,
        }
    }

    pub fn open_channel_count(&self) -> usize {
        self.channels.len()
    }

    /// A snapshot of this source's discovery/reap/pop counters.
    pub fn metrics(&self) -> SourceMetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Liveness probe: counts how many open file descriptions across the
/// whole system point at the same device+inode as `file`, by walking
/// `/proc/*/fd`. A channel is declared dead when that count is `<= 1`
/// (this process's own handle, with no producer left holding it open).
///
/// Inherently racy by design: a result of "dead" may be stale if a
/// producer opens the file again in the gap between the probe and the
/// reap, but producers never reopen an existing channel file, only
/// create new ones, so that race cannot resurrect a channel believed
/// dead. False "not dead" results just mean reaping is retried on the
/// next cleanup pass.
fn is_dead(file: &File) -> bool {
    reference_count(file).map(|count| count <= 1).unwrap_or(false)
}

fn reference_count(file: &File) -> Option<u64> {
    let metadata = file.metadata().ok()?;
    let (target_dev, target_ino) = (metadata.dev(), metadata.ino());

    let proc_entries = read_dir_with_backoff("/proc".as_ref())?;

    let mut count = 0u64;
    for proc_entry in proc_entries.flatten() {
        if !proc_entry.file_name().to_string_lossy().chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let fd_dir = proc_entry.path().join("fd");
        let Some(fd_entries) = read_dir_with_backoff(&fd_dir) else {
            continue;
        };

        for fd_entry in fd_entries.flatten() {
            if let Ok(meta) = fs::metadata(fd_entry.path()) {
                if meta.dev() == target_dev && meta.ino() == target_ino {
                    count += 1;
                }
            }
        }
    }

    Some(count)
}

/// `/proc` reads race against processes exiting and their `/proc/<pid>`
/// entries disappearing mid-scan; a bare `ENOENT` here is expected churn,
/// not a real failure. Retries with backoff before giving up, rather than
/// treating the first transient error as conclusive.
fn read_dir_with_backoff(path: &std::path::Path) -> Option<fs::ReadDir> {
    const MAX_ATTEMPTS: u32 = 4;
    let mut backoff = Backoff::new();
    for attempt in 0..MAX_ATTEMPTS {
        match fs::read_dir(path) {
            Ok(entries) => return Some(entries),
            Err(_) if attempt + 1 < MAX_ATTEMPTS => backoff.snooze(),
            Err(_) => return None,
        }
    }
    None
}
