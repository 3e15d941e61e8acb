//! A process scoreboard in shared memory.
//!
//! A master process creates a [`Scoreboard`] holding a fixed number of
//! record slots, hands slot indices to the workers it forks, and reads the
//! whole board back with consistent snapshots. Each worker publishes its
//! own [`Record`] through a [`SlotHandle`]; byte-range locks keep writers to
//! different slots independent while keeping every snapshot untorn.

#[cfg(not(unix))]
compile_error!("shm_scoreboard requires a unix target (mmap and fcntl record locks)");

mod allocator;
mod config;
mod error;
mod reaper;
mod record;
mod scoreboard;
pub mod shm;
mod slot;
mod snapshot;

#[cfg(feature = "python")]
mod python;

#[cfg(test)]
mod test_support;

pub use allocator::SlotAllocator;
pub use config::{RegionConfig, ENV_DIR, ENV_LOCK_TIMEOUT_MS};
pub use error::{Result, ScoreboardError};
pub use reaper::{is_dead, sweep, sweep_dead};
pub use record::{now_micros, Record, RecordUpdate, Status};
pub use scoreboard::Scoreboard;
pub use shm::{decode, encode, LockMode, RangeGuard, RecordLayout, Region, RECORD_SIZE};
pub use slot::SlotHandle;
pub use snapshot::{summarize, Summary};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn _shm_scoreboard(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::PyScoreboard>()?;
    m.add_class::<python::PyWorkerSlot>()?;
    m.add_class::<python::PySlotRecord>()?;
    m.add_class::<python::PySummary>()?;
    Ok(())
}
