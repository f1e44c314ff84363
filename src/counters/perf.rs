//! Kernel-assisted counter backend: `perf_event_open` + an mmap'd
//! user-page + `rdpmc`.
//!
//! The kernel opens a counter and hands back a small control page mapped
//! read-only into this process. That page carries a seqlock-protected
//! description of which hardware counter index to read with `rdpmc`, so
//! a hot-path read never has to cross into the kernel: it is a handful
//! of loads plus one `rdpmc`. This mirrors the approach `perf_event_open`
//! itself documents and that reference implementations of sampling
//! profilers rely on to keep the instrumented thread's overhead low.

use std::fs::File;
use std::io::Error as IoError;
use std::os::fd::{AsRawFd, FromRawFd};
use std::ptr::NonNull;
use std::sync::atomic::{fence, Ordering};

use crate::counters::arch::{self, PerfEventId};
use crate::error::CounterError;
use crate::record::CounterType;

const PERF_EVENT_IOC_ENABLE: u64 = 0x2400;
const PERF_EVENT_IOC_DISABLE: u64 = 0x2401;

/// Mirrors the kernel's `perf_event_attr`, trimmed to the fields this
/// crate sets (everything else is zeroed, matching the kernel's
/// documented "unset means default" contract).
#[repr(C)]
#[derive(Default)]
struct PerfEventAttr {
    type_: u32,
    size: u32,
    config: u64,
    sample_period_or_freq: u64,
    sample_type: u64,
    read_format: u64,
    flags: u64,
    wakeup_events_or_watermark: u32,
    bp_type: u32,
    config1_or_bp_addr: u64,
    config2_or_bp_len: u64,
    branch_sample_type: u64,
    sample_regs_user: u64,
    sample_stack_user: u32,
    clockid: i32,
    sample_regs_intr: u64,
    aux_watermark: u32,
    sample_max_stack: u16,
    __reserved_2: u16,
}

const EXCLUDE_KERNEL: u64 = 1 << 5;
const EXCLUDE_HV: u64 = 1 << 6;
const DISABLED: u64 = 1 << 0;

fn syscall_perf_event_open(attr: &PerfEventAttr, pid: i32, cpu: i32, group_fd: i32, flags: u64) -> Result<File, IoError> {
    // SAFETY: `attr` is a valid, fully initialized `PerfEventAttr` with
    // `size` set to its own size, as the syscall requires.
    let fd = unsafe {
        libc::syscall(
            libc::SYS_perf_event_open,
            attr as *const PerfEventAttr,
            pid,
            cpu,
            group_fd,
            flags,
        )
    };
    if fd == -1 {
        Err(IoError::last_os_error())
    } else {
        // SAFETY: the kernel returned a freshly opened, owned fd.
        Ok(unsafe { File::from_raw_fd(fd as i32) })
    }
}

fn ioctl(file: &File, request: u64) -> Result<(), IoError> {
    // SAFETY: `file`'s fd is valid for the lifetime of this call; these
    // requests take no argument pointer.
    let result = unsafe { libc::ioctl(file.as_raw_fd(), request as _) };
    if result == -1 {
        Err(IoError::last_os_error())
    } else {
        Ok(())
    }
}

/// The subset of the kernel's `perf_event_mmap_page` this crate reads:
/// a seqlock (`lock`), an `index`/`offset` pair describing the hardware
/// counter to `rdpmc`, and a `cap_user_rdpmc` capability bit. Field
/// layout and offsets are fixed by the kernel ABI and must not be
/// reordered. See `perf_event.h` in the kernel source for the full
/// struct this is a prefix of.
#[repr(C)]
struct PerfEventMmapPage {
    version: u32,
    compat_version: u32,
    lock: u32,
    index: u32,
    offset: i64,
    time_enabled: u64,
    time_running: u64,
    capabilities: u64,
    pmc_width: u16,
    time_shift: u16,
    time_mult: u32,
    time_offset: u64,
    time_zero: u64,
    size: u32,
    __reserved_1: u32,
    time_cycles: u64,
    time_mask: u64,
}

const CAP_USER_RDPMC_BIT: u64 = 1 << 2;

/// An open, mmap'd hardware counter handle.
///
/// Reads happen through the seqlock-protected user page with `rdpmc`
/// when the kernel grants that capability; otherwise falls back to a
/// `read()` syscall on the counter fd.
pub struct PerfCounter {
    file: File,
    page: NonNull<PerfEventMmapPage>,
    page_len: usize,
}

// SAFETY: the mapped page is read via an internal seqlock protocol; no
// interior mutation happens through `&PerfCounter` without that protocol.
unsafe impl Send for PerfCounter {}

impl PerfCounter {
    /// Opens and enables a hardware counter for `counter_type`, scoped to
    /// the calling thread (`pid = 0`) on whichever CPU it happens to run
    /// on (`cpu = -1`), excluding kernel and hypervisor cycles.
    pub fn open(counter_type: CounterType) -> Result<Self, CounterError> {
        let PerfEventId { perf_type, config } =
            arch::resolve(counter_type).ok_or(CounterError::UnsupportedCombination)?;

        let mut attr = PerfEventAttr {
            type_: perf_type,
            size: std::mem::size_of::<PerfEventAttr>() as u32,
            config,
            flags: EXCLUDE_KERNEL | EXCLUDE_HV | DISABLED,
            ..PerfEventAttr::default()
        };
        attr.size = std::mem::size_of::<PerfEventAttr>() as u32;

        let file = syscall_perf_event_open(&attr, 0, -1, -1, 0)
            .map_err(|e| CounterError::OpenFailed { errno: e.raw_os_error().unwrap_or(-1) })?;

        let page_len = page_size();
        // SAFETY: `file` is a freshly opened perf_event fd; mapping one
        // page at offset 0 is exactly what the kernel's perf_event_open
        // ABI documents for obtaining the user page.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                page_len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(CounterError::OpenFailed {
                errno: IoError::last_os_error().raw_os_error().unwrap_or(-1),
            });
        }

        ioctl(&file, PERF_EVENT_IOC_ENABLE)
            .map_err(|e| CounterError::OpenFailed { errno: e.raw_os_error().unwrap_or(-1) })?;

        Ok(Self {
            file,
            // SAFETY: `mmap` returned a non-null pointer on success.
            page: unsafe { NonNull::new_unchecked(ptr.cast()) },
            page_len,
        })
    }

    /// Reads the current counter value.
    ///
    /// Uses the lock-free `rdpmc` path when the kernel page advertises
    /// `cap_user_rdpmc`; otherwise issues a `read()` syscall. Either way
    /// this never blocks.
    pub fn read(&self) -> Result<u64, CounterError> {
        if let Some(value) = self.try_read_rdpmc() {
            return Ok(value);
        }
        self.read_syscall()
    }

    fn try_read_rdpmc(&self) -> Option<u64> {
        const MAX_RETRIES: u32 = 64;
        // SAFETY: `page` stays validly mapped for `self`'s lifetime; every
        // field read below is a plain volatile load of kernel-owned memory,
        // guarded by the seqlock in `lock`.
        unsafe {
            let page = self.page.as_ptr();
            for _ in 0..MAX_RETRIES {
                let seq_before = std::ptr::read_volatile(&raw const (*page).lock);
                fence(Ordering::Acquire);
                if seq_before & 1 != 0 {
                    continue; // kernel mid-update, retry
                }

                let capabilities = std::ptr::read_volatile(&raw const (*page).capabilities);
                if capabilities & CAP_USER_RDPMC_BIT == 0 {
                    return None;
                }

                let index = std::ptr::read_volatile(&raw const (*page).index);
                let offset = std::ptr::read_volatile(&raw const (*page).offset);
                if index == 0 {
                    return None; // counter not currently scheduled on a PMU
                }

                let raw = read_pmc(index - 1);
                let value = (raw as i64).wrapping_add(offset) as u64;

                fence(Ordering::Acquire);
                let seq_after = std::ptr::read_volatile(&raw const (*page).lock);
                if seq_before == seq_after {
                    return Some(value);
                }
            }
        }
        None
    }

    fn read_syscall(&self) -> Result<u64, CounterError> {
        let mut buf = [0u8; 8];
        // SAFETY: `buf` is sized for exactly one `u64` counter value, the
        // format this counter was opened with (no `PERF_FORMAT_GROUP`).
        let n = unsafe { libc::read(self.file.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if n != 8 {
            return Err(CounterError::SeqlockUnstable { retries: 0 });
        }
        Ok(u64::from_ne_bytes(buf))
    }
}

impl Drop for PerfCounter {
    fn drop(&mut self) {
        let _ = ioctl(&self.file, PERF_EVENT_IOC_DISABLE);
        // SAFETY: `self.page` was obtained from `mmap` with `self.page_len`
        // and is unmapped exactly once, here.
        unsafe {
            libc::munmap(self.page.as_ptr().cast(), self.page_len);
        }
    }
}

#[cfg(target_arch = "x86_64")]
unsafe fn read_pmc(counter: u32) -> u64 {
    core::arch::x86_64::_rdpmc(counter as i32) as u64
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn read_pmc(_counter: u32) -> u64 {
    0
}

fn page_size() -> usize {
    // SAFETY: `sysconf(_SC_PAGESIZE)` has no preconditions.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
