use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Directory/file layout failures.
#[derive(Debug, Error, Clone)]
pub enum LayoutError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir { path: String, source: Arc<io::Error> },

    #[error("failed to create channel file {path}: {source}")]
    CreateFile { path: String, source: Arc<io::Error> },

    #[error("failed to truncate channel file {path} to {size} bytes: {source}")]
    Truncate {
        path: String,
        size: usize,
        source: Arc<io::Error>,
    },

    #[error("failed to map channel file {path}: {source}")]
    Map { path: String, source: Arc<io::Error> },

    #[error("failed to publish channel file {tmp} -> {rec}: {source}")]
    Rename {
        tmp: String,
        rec: String,
        source: Arc<io::Error>,
    },

    #[error("root directory {path} is not usable as shared memory storage")]
    RootUnusable { path: String },
}

impl LayoutError {
    pub(crate) fn create_dir(path: impl Into<String>, source: io::Error) -> Self {
        Self::CreateDir {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn create_file(path: impl Into<String>, source: io::Error) -> Self {
        Self::CreateFile {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn truncate(path: impl Into<String>, size: usize, source: io::Error) -> Self {
        Self::Truncate {
            path: path.into(),
            size,
            source: Arc::new(source),
        }
    }

    pub(crate) fn map(path: impl Into<String>, source: io::Error) -> Self {
        Self::Map {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn rename(tmp: impl Into<String>, rec: impl Into<String>, source: io::Error) -> Self {
        Self::Rename {
            tmp: tmp.into(),
            rec: rec.into(),
            source: Arc::new(source),
        }
    }
}

/// Beacon file failures.
#[derive(Debug, Error, Clone)]
pub enum BeaconError {
    #[error("failed to open beacon file {path}: {source}")]
    Open { path: String, source: Arc<io::Error> },

    #[error("failed to map beacon file {path}: {source}")]
    Map { path: String, source: Arc<io::Error> },
}

/// Hardware counter failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CounterError {
    #[error("unsupported counter kind/exclusion-flag combination")]
    UnsupportedCombination,

    #[error("perf_event_open failed: errno {errno}")]
    OpenFailed { errno: i32 },

    #[error("counter backend is unavailable in this build")]
    BackendUnavailable,

    #[error("seqlock read did not stabilize after {retries} retries")]
    SeqlockUnstable { retries: u32 },
}

/// Thread registry / process init failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("thread id space exhausted (max {max} threads)")]
    ThreadIdsExhausted { max: usize },

    #[error("init_thread called before process init")]
    ProcessNotInitialized,

    #[error("init_thread called more than once on this thread")]
    ThreadAlreadyInitialized,
}

/// Aggregate fatal error for `RecordSink::init`.
#[derive(Debug, Error, Clone)]
pub enum SinkInitError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Beacon(#[from] BeaconError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Aggregate fatal error for `RecordSource::init`.
#[derive(Debug, Error, Clone)]
pub enum SourceInitError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Beacon(#[from] BeaconError),
}
