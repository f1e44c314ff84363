//! DDTrace: a low-overhead, in-process tracing library that records
//! time- and hardware-counter-delimited intervals on traced worker
//! threads and exposes them, out-of-band, to a separate consumer
//! process via shared memory.
//!
//! Each interval carries a [`vector_clock::VectorClock`] identifying the
//! logical request it belongs to, so a consumer can reassemble a
//! partial-order graph of interval events across many producers.
//!
//! The hot path ([`sink::RecordSink::record_interval_end`] and the
//! [`interval::Interval`] handle wrapping it) never blocks and never
//! fails audibly: every failure on that path degrades to a silent drop.
//! Initialization ([`registry::init`], [`registry::init_thread`],
//! [`sink::RecordSink::init`], [`source::RecordSource::init`]) is the
//! opposite: every failure there is meant to be fatal.

pub mod backoff;
pub mod beacon;
pub mod clock;
pub mod config;
pub mod counters;
pub mod error;
pub mod interval;
pub mod layout;
pub mod metrics;
pub mod record;
pub mod registry;
pub mod sink;
pub mod sla;
pub mod source;
pub mod spsc;
pub mod vector_clock;

pub(crate) mod invariants;

pub use config::{Config, CounterBackend};
pub use error::{
    BeaconError, CounterError, LayoutError, RegistryError, SinkInitError, SourceInitError,
};
pub use interval::Interval;
pub use metrics::{SinkMetricsSnapshot, SourceMetricsSnapshot};
pub use record::{CounterType, IntervalRecord, PerfRecord, RecordStorage};
pub use registry::{init, init_thread, init_thread_sink, is_enabled, set_enabled, this_thread_id, ThreadId};
pub use sink::RecordSink;
pub use sla::{LongIntervalRule, SlaRule, SlaRules};
pub use source::RecordSource;
pub use spsc::SpscRing;
pub use vector_clock::{ClockEntry, VectorClock};
