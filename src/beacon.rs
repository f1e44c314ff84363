//! Channels-version beacon.
//!
//! A single shared `u64` living in an 8-byte file named
//! `channelsVersions`, mapped by every producer and the consumer.
//! Producers `fetch_add` it on publish; the consumer polls it with a
//! relaxed load and rescans the directory when it has moved.

use std::fs::OpenOptions;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::BeaconError;

const BEACON_FILE_NAME: &str = "channelsVersions";
const BEACON_SIZE: usize = std::mem::size_of::<u64>();

/// A handle to the shared `channelsVersions` beacon, backed by an mmap'd
/// 8-byte file.
pub struct ChannelsVersion {
    ptr: NonNull<AtomicU64>,
}

// SAFETY: the pointee is a single `AtomicU64`; all access goes through
// atomic operations, which are valid to perform concurrently from any
// number of threads and processes mapping the same file.
unsafe impl Send for ChannelsVersion {}
unsafe impl Sync for ChannelsVersion {}

impl ChannelsVersion {
    /// Opens (creating if necessary) the beacon file under `schema_dir`.
    ///
    /// First creation zero-initializes the counter (`set_len` on a
    /// brand-new file yields zero bytes); subsequent opens leave the
    /// existing value untouched.
    pub fn open(schema_dir: &Path) -> Result<Self, BeaconError> {
        let path = schema_dir.join(BEACON_FILE_NAME);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o666)
            .open(&path)
            .map_err(|e| BeaconError::Open { path: path.display().to_string(), source: e.into() })?;

        let metadata = file
            .metadata()
            .map_err(|e| BeaconError::Open { path: path.display().to_string(), source: e.into() })?;
        if metadata.len() < BEACON_SIZE as u64 {
            file.set_len(BEACON_SIZE as u64)
                .map_err(|e| BeaconError::Open { path: path.display().to_string(), source: e.into() })?;
        }

        let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666));

        // SAFETY: `file` is open for read+write and sized to at least
        // `BEACON_SIZE` bytes, as just ensured above.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                BEACON_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                std::os::fd::AsRawFd::as_raw_fd(&file),
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(BeaconError::Map {
                path: path.display().to_string(),
                source: std::io::Error::last_os_error().into(),
            });
        }

        Ok(Self {
            // SAFETY: `mmap` returned non-null on success.
            ptr: unsafe { NonNull::new_unchecked(raw.cast()) },
        })
    }

    fn atomic(&self) -> &AtomicU64 {
        // SAFETY: the mapping lives for as long as `self` does and is
        // never unmapped early; it is never accessed through anything
        // but this atomic reference.
        unsafe { self.ptr.as_ref() }
    }

    /// Producer-side: bumps the beacon after publishing a new channel.
    pub fn bump(&self) -> u64 {
        self.atomic().fetch_add(1, Ordering::Relaxed)
    }

    /// Consumer-side: reads the current version.
    pub fn current(&self) -> u64 {
        self.atomic().load(Ordering::Relaxed)
    }
}

impl Drop for ChannelsVersion {
    fn drop(&mut self) {
        // SAFETY: `self.ptr` was obtained from `mmap` of exactly
        // `BEACON_SIZE` bytes and is unmapped exactly once, here.
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), BEACON_SIZE);
        }
    }
}
