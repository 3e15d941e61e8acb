use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, ScoreboardError};

/// Lifecycle state of the worker occupying a slot.
///
/// The discriminant is the wire encoding.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Status {
    /// Never started, exited, or reset by the reaper.
    #[default]
    Dead = 0,
    /// Shutting down; still owns the slot.
    Dying = 1,
    /// Idle, waiting for a request.
    Waiting = 2,
    /// Handling a request.
    Processing = 3,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Dead,
        Status::Dying,
        Status::Waiting,
        Status::Processing,
    ];

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the occupant has exited.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Dead)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Dead => write!(f, "dead"),
            Status::Dying => write!(f, "dying"),
            Status::Waiting => write!(f, "waiting"),
            Status::Processing => write!(f, "processing"),
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = ScoreboardError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Status::Dead),
            1 => Ok(Status::Dying),
            2 => Ok(Status::Waiting),
            3 => Ok(Status::Processing),
            other => Err(ScoreboardError::Validation(other.into())),
        }
    }
}

/// The status payload stored in one slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Record {
    /// Current or most recent occupant; 0 if the slot was never assigned.
    pub pid: u32,
    pub status: Status,
    /// Microseconds since the Unix epoch; 0 if never set.
    pub last_request_started_at: u64,
    pub requests_served: u64,
    pub errors_served: u64,
}

impl Record {
    /// The all-default record (pid 0, Dead, no timestamp, zero counters).
    pub const EMPTY: Record = Record {
        pid: 0,
        status: Status::Dead,
        last_request_started_at: 0,
        requests_served: 0,
        errors_served: 0,
    };

    /// Overwrite the fields present in `update`, leaving the rest alone.
    pub fn apply(&mut self, update: &RecordUpdate) {
        if let Some(pid) = update.pid {
            self.pid = pid;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(ts) = update.last_request_started_at {
            self.last_request_started_at = ts;
        }
        if let Some(requests) = update.requests_served {
            self.requests_served = requests;
        }
        if let Some(errors) = update.errors_served {
            self.errors_served = errors;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

/// A partial overwrite of a [`Record`]. Fields left as `None` are untouched.
///
/// ```
/// use shm_scoreboard::{RecordUpdate, Status};
///
/// let update = RecordUpdate::new()
///     .pid(4321)
///     .status(Status::Processing)
///     .requests_served(5);
/// assert_eq!(update.errors_served, None);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub pid: Option<u32>,
    pub status: Option<Status>,
    pub last_request_started_at: Option<u64>,
    pub requests_served: Option<u64>,
    pub errors_served: Option<u64>,
}

impl RecordUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the status from its wire value, rejecting anything outside the
    /// four defined states.
    pub fn status_code(self, code: i64) -> Result<Self> {
        let wire = u8::try_from(code).map_err(|_| ScoreboardError::Validation(code))?;
        Ok(self.status(Status::try_from(wire)?))
    }

    pub fn last_request_started_at(mut self, micros: u64) -> Self {
        self.last_request_started_at = Some(micros);
        self
    }

    pub fn requests_served(mut self, requests: u64) -> Self {
        self.requests_served = Some(requests);
        self
    }

    pub fn errors_served(mut self, errors: u64) -> Self {
        self.errors_served = Some(errors);
        self
    }
}

/// Wall-clock time in microseconds since the Unix epoch.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
