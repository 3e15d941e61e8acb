use std::time::Duration;

use parking_lot::Mutex;
use pyo3::exceptions::{PyOSError, PyRuntimeError, PyTimeoutError, PyValueError};
use pyo3::prelude::*;

use crate::config::RegionConfig;
use crate::error::ScoreboardError;
use crate::record::{Record, RecordUpdate};
use crate::scoreboard::Scoreboard;
use crate::shm::{RecordLayout, Region};
use crate::slot::SlotHandle;
use crate::snapshot::Summary;

impl From<ScoreboardError> for PyErr {
    fn from(err: ScoreboardError) -> PyErr {
        let msg = err.to_string();
        match err {
            ScoreboardError::Validation(_)
            | ScoreboardError::Index { .. }
            | ScoreboardError::Range { .. }
            | ScoreboardError::LayoutMismatch { .. } => PyValueError::new_err(msg),
            ScoreboardError::Exhausted { .. }
            | ScoreboardError::DoubleFree { .. }
            | ScoreboardError::AlreadyMapped { .. } => PyRuntimeError::new_err(msg),
            ScoreboardError::LockTimeout { .. } => PyTimeoutError::new_err(msg),
            ScoreboardError::Allocation { .. } | ScoreboardError::Io(_) => {
                PyOSError::new_err(msg)
            }
        }
    }
}

fn layout(compact: bool) -> RecordLayout {
    if compact {
        RecordLayout::COMPACT
    } else {
        RecordLayout::CACHE_LINE
    }
}

/// One slot's record, exposed to Python.
#[pyclass(frozen, name = "SlotRecord")]
pub struct PySlotRecord {
    #[pyo3(get)]
    pub index: usize,
    #[pyo3(get)]
    pub pid: u32,
    #[pyo3(get)]
    pub status: u8,
    #[pyo3(get)]
    pub status_name: String,
    #[pyo3(get)]
    pub last_request_started_at: u64,
    #[pyo3(get)]
    pub requests_served: u64,
    #[pyo3(get)]
    pub errors_served: u64,
}

impl PySlotRecord {
    fn new(index: usize, record: &Record) -> Self {
        PySlotRecord {
            index,
            pid: record.pid,
            status: record.status.as_u8(),
            status_name: record.status.to_string(),
            last_request_started_at: record.last_request_started_at,
            requests_served: record.requests_served,
            errors_served: record.errors_served,
        }
    }
}

#[pymethods]
impl PySlotRecord {
    fn __repr__(&self) -> String {
        format!(
            "SlotRecord(index={}, pid={}, status={}, last_request_started_at={}, requests_served={}, errors_served={})",
            self.index,
            self.pid,
            self.status_name,
            self.last_request_started_at,
            self.requests_served,
            self.errors_served
        )
    }
}

#[pyclass(frozen, name = "ScoreboardSummary")]
pub struct PySummary {
    #[pyo3(get)]
    pub dead: usize,
    #[pyo3(get)]
    pub dying: usize,
    #[pyo3(get)]
    pub waiting: usize,
    #[pyo3(get)]
    pub processing: usize,
    #[pyo3(get)]
    pub requests_served: u64,
    #[pyo3(get)]
    pub errors_served: u64,
}

impl From<Summary> for PySummary {
    fn from(s: Summary) -> Self {
        PySummary {
            dead: s.dead,
            dying: s.dying,
            waiting: s.waiting,
            processing: s.processing,
            requests_served: s.requests_served,
            errors_served: s.errors_served,
        }
    }
}

#[pymethods]
impl PySummary {
    fn __repr__(&self) -> String {
        format!(
            "ScoreboardSummary(dead={}, dying={}, waiting={}, processing={}, requests_served={}, errors_served={})",
            self.dead,
            self.dying,
            self.waiting,
            self.processing,
            self.requests_served,
            self.errors_served
        )
    }
}

/// Master-side scoreboard. Create it before forking workers.
#[pyclass(frozen, name = "Scoreboard")]
pub struct PyScoreboard {
    inner: Scoreboard,
}

#[pymethods]
impl PyScoreboard {
    #[new]
    #[pyo3(signature = (capacity, name=None, dir=None, lock_timeout=None, compact=false))]
    fn new(
        capacity: usize,
        name: Option<String>,
        dir: Option<String>,
        lock_timeout: Option<f64>,
        compact: bool,
    ) -> PyResult<Self> {
        let mut config = RegionConfig::new(capacity)
            .with_layout(layout(compact))
            .with_env_overrides();
        if let Some(name) = name {
            config = config.with_name(name);
        }
        if let Some(dir) = dir {
            config = config.with_dir(dir);
        }
        if let Some(secs) = lock_timeout {
            let timeout = Duration::try_from_secs_f64(secs)
                .map_err(|e| PyValueError::new_err(format!("invalid lock_timeout: {e}")))?;
            config = config.with_lock_timeout(timeout);
        }
        Ok(PyScoreboard {
            inner: Scoreboard::new(config)?,
        })
    }

    #[getter]
    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Backing file path, for `WorkerSlot.attach` in unrelated processes.
    #[getter]
    fn path(&self) -> String {
        self.inner.region().path().display().to_string()
    }

    /// Reserve a slot and return its index.
    fn allocate(&self) -> PyResult<usize> {
        Ok(self.inner.allocate()?.index())
    }

    fn release(&self, index: usize) -> PyResult<()> {
        Ok(self.inner.release_index(index)?)
    }

    /// Reclaim slots whose worker reported Dead. Returns their indices.
    fn sweep(&self, py: Python<'_>) -> PyResult<Vec<usize>> {
        Ok(py.detach(|| self.inner.sweep_dead())?)
    }

    fn snapshot(&self, py: Python<'_>) -> PyResult<Vec<PySlotRecord>> {
        let records = py.detach(|| self.inner.snapshot())?;
        Ok(records
            .iter()
            .enumerate()
            .map(|(i, r)| PySlotRecord::new(i, r))
            .collect())
    }

    fn summary(&self, py: Python<'_>) -> PyResult<PySummary> {
        Ok(py.detach(|| self.inner.summary())?.into())
    }

    /// Handle for the worker given slot `index` (after fork).
    fn worker_slot(&self, index: usize) -> PyResult<PyWorkerSlot> {
        Ok(PyWorkerSlot::wrap(self.inner.worker_slot(index)?))
    }

    fn __repr__(&self) -> String {
        format!(
            "Scoreboard(capacity={}, free={}, path={:?})",
            self.inner.capacity(),
            self.inner.free_count(),
            self.inner.region().path()
        )
    }
}

/// Worker-side handle on one slot.
#[pyclass(frozen, name = "WorkerSlot")]
pub struct PyWorkerSlot {
    slot: Mutex<SlotHandle>,
}

impl PyWorkerSlot {
    fn wrap(slot: SlotHandle) -> Self {
        PyWorkerSlot {
            slot: Mutex::new(slot),
        }
    }
}

#[pymethods]
impl PyWorkerSlot {
    /// Attach to a region by path, for processes that did not inherit it.
    ///
    /// Raises `RuntimeError` in a process that already maps the region (the
    /// master, or a worker forked from it); use `Scoreboard.worker_slot`
    /// there instead.
    #[staticmethod]
    #[pyo3(signature = (path, index, compact=false))]
    fn attach(path: String, index: usize, compact: bool) -> PyResult<Self> {
        let region = Region::attach(path, layout(compact))?;
        Ok(Self::wrap(SlotHandle::new(region.into(), index)?))
    }

    #[getter]
    fn index(&self) -> usize {
        self.slot.lock().index()
    }

    /// Overwrite the given fields locally. Call `flush` to publish.
    #[pyo3(signature = (pid=None, status=None, timestamp=None, requests=None, errors=None))]
    fn update(
        &self,
        pid: Option<u32>,
        status: Option<i64>,
        timestamp: Option<u64>,
        requests: Option<u64>,
        errors: Option<u64>,
    ) -> PyResult<()> {
        let mut update = RecordUpdate::new();
        if let Some(code) = status {
            update = update.status_code(code)?;
        }
        update.pid = pid;
        update.last_request_started_at = timestamp;
        update.requests_served = requests;
        update.errors_served = errors;
        self.slot.lock().update(update);
        Ok(())
    }

    fn reset(&self) {
        self.slot.lock().reset();
    }

    fn begin_request(&self) {
        self.slot.lock().begin_request();
    }

    #[pyo3(signature = (ok=true))]
    fn finish_request(&self, ok: bool) {
        self.slot.lock().finish_request(ok);
    }

    fn flush(&self, py: Python<'_>) -> PyResult<()> {
        Ok(py.detach(|| self.slot.lock().flush())?)
    }

    fn load(&self, py: Python<'_>) -> PyResult<()> {
        Ok(py.detach(|| self.slot.lock().load())?)
    }

    /// The local, possibly unflushed, record.
    fn record(&self) -> PySlotRecord {
        let slot = self.slot.lock();
        PySlotRecord::new(slot.index(), slot.record())
    }
}
