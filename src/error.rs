//! Error types for the scoreboard.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::shm::lock::LockMode;

/// Errors raised by the region, slot handles, the allocator and the reaper.
#[derive(Error, Debug)]
pub enum ScoreboardError {
    /// The backing shared region could not be created or mapped.
    #[error("failed to allocate shared region at {path}: {source}")]
    Allocation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("slot index {index} out of range for capacity {capacity}")]
    Index { index: usize, capacity: usize },

    /// A raw byte range is empty or extends past the end of the region.
    #[error("byte range {offset}+{len} is invalid for a region of {size} bytes")]
    Range {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("invalid worker status value {0} (expected 0..=3)")]
    Validation(i64),

    /// Every slot is assigned. Callers should hold off spawning workers.
    #[error("all {capacity} scoreboard slots are assigned")]
    Exhausted { capacity: usize },

    #[error("slot {index} released while already free")]
    DoubleFree { index: usize },

    #[error("region I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("timed out after {timeout:?} waiting for {mode:?} lock on bytes {offset}+{len}")]
    LockTimeout {
        offset: usize,
        len: usize,
        mode: LockMode,
        timeout: Duration,
    },

    /// This process already maps the backing file through another `Region`.
    /// fcntl locks do not exclude each other within one process, so a second
    /// mapping could not be kept consistent with the first.
    #[error("backing file {path} is already mapped by this process")]
    AlreadyMapped { path: PathBuf },

    /// Writer and reader disagree on the record size, or a layout is malformed.
    #[error("record layout mismatch: expected {expected} bytes, found {actual}")]
    LayoutMismatch { expected: usize, actual: usize },
}

impl ScoreboardError {
    /// Whether retrying the failed operation can succeed without fixing a bug
    /// or changing configuration.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Exhausted { .. } | Self::Io(_) | Self::LockTimeout { .. }
        )
    }
}

/// Result type alias for scoreboard operations.
pub type Result<T> = std::result::Result<T, ScoreboardError>;
