//! Process init and thread registry: assigns each traced thread a dense
//! id in `[0, MAX_THREADS)`, and carries the process-wide counter type
//! and server id that every thread's interval increments are attributed
//! to.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::config::{Config, MAX_THREADS};
use crate::counters::CounterHandle;
use crate::error::{RegistryError, SinkInitError};
use crate::record::CounterType;
use crate::sink::RecordSink;

/// A dense, never-reused per-thread id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadId(pub usize);

struct ProcessState {
    counter_type: CounterType,
    server_id: u16,
    config: Config,
}

static PROCESS_STATE: OnceLock<ProcessState> = OnceLock::new();
static NEXT_THREAD_ID: Mutex<usize> = Mutex::new(0);

/// Separate from "initialized": a process is initialized exactly once,
/// but recording can be toggled on and off any number of times after
/// that, e.g. to silence tracing for a maintenance window without
/// tearing down every thread's sink.
static ENABLED: AtomicBool = AtomicBool::new(true);

thread_local! {
    static THIS_THREAD_ID: Cell<Option<ThreadId>> = const { Cell::new(None) };
    static THIS_THREAD_COUNTER: RefCell<Option<CounterHandle>> = const { RefCell::new(None) };
}

/// Sets the process-wide counter type and server id. Idempotent: a
/// second call with different arguments is silently ignored, since the
/// first caller's configuration already governs every thread that may
/// have initialized in between.
pub fn init(counter_type: CounterType, server_id: u16) {
    init_with_config(counter_type, server_id, Config::from_env());
}

/// Like [`init`], but with an explicit [`Config`] rather than one
/// derived from the environment. Exists so tests and embedders can avoid
/// depending on `DDTRACE_ROOT`.
pub fn init_with_config(counter_type: CounterType, server_id: u16, config: Config) {
    let _ = PROCESS_STATE.set(ProcessState { counter_type, server_id, config });
}

fn process_state() -> Result<&'static ProcessState, RegistryError> {
    PROCESS_STATE.get().ok_or(RegistryError::ProcessNotInitialized)
}

/// Assigns the calling thread the next dense `ThreadId` and opens its
/// hardware counter handle. Must be called exactly once per thread that
/// ever records; calling again on the same thread is an error.
pub fn init_thread() -> Result<ThreadId, RegistryError> {
    if THIS_THREAD_ID.with(|id| id.get().is_some()) {
        return Err(RegistryError::ThreadAlreadyInitialized);
    }

    let state = process_state()?;

    let id = {
        let mut next = NEXT_THREAD_ID.lock().unwrap_or_else(|e| e.into_inner());
        if *next >= MAX_THREADS {
            return Err(RegistryError::ThreadIdsExhausted { max: MAX_THREADS });
        }
        let assigned = *next;
        *next += 1;
        assigned
    };

    let handle = CounterHandle::open(state.counter_type, state.config.counter_backend).ok();
    THIS_THREAD_COUNTER.with(|c| *c.borrow_mut() = handle);

    let thread_id = ThreadId(id);
    THIS_THREAD_ID.with(|slot| slot.set(Some(thread_id)));
    Ok(thread_id)
}

/// Convenience: [`init_thread`] followed by [`RecordSink::init`] for
/// this thread's sink.
pub fn init_thread_sink(base_name: &str) -> Result<RecordSink, SinkInitError> {
    init_thread()?;
    let state = process_state()?;
    RecordSink::init(&state.config, base_name, state.server_id)
}

/// The calling thread's assigned id, if [`init_thread`] has run.
pub fn this_thread_id() -> Option<ThreadId> {
    THIS_THREAD_ID.with(|id| id.get())
}

/// Runs `f` with a reference to the calling thread's hardware counter
/// handle, or `None` if `init_thread` has not run or no handle could be
/// opened (e.g. `CounterType::TimeOnly`).
pub fn with_this_thread_counter<R>(f: impl FnOnce(Option<&CounterHandle>) -> R) -> R {
    THIS_THREAD_COUNTER.with(|c| f(c.borrow().as_ref()))
}

/// The process-wide counter type and server id, if [`init`] has run.
pub fn process_counter_type_and_server_id() -> Option<(CounterType, u16)> {
    PROCESS_STATE.get().map(|s| (s.counter_type, s.server_id))
}

/// Whether recording is currently enabled. `true` from process start
/// until [`set_enabled`] says otherwise.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Turns recording on or off process-wide, independent of whether
/// [`init`] has run. Takes effect on the next call into
/// [`crate::sink::RecordSink::record_interval_end`]; in-flight calls are
/// unaffected.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}
