//! Consistent whole-region reads for monitoring.

use std::time::Duration;

use crate::error::Result;
use crate::record::{Record, Status};
use crate::shm::{LockMode, Region};

impl Region {
    /// Every slot's record, ordered by index, as of one instant.
    ///
    /// Holds a shared lock over the whole region while copying, so no
    /// record is ever seen half-written. The result is a private copy.
    pub fn snapshot(&self) -> Result<Vec<Record>> {
        self.snapshot_timeout(self.lock_timeout())
    }

    pub fn snapshot_timeout(&self, timeout: Option<Duration>) -> Result<Vec<Record>> {
        let size = self.size();
        let mut bytes = vec![0u8; size];
        {
            let guard = self.lock_range(0, size, LockMode::Shared, timeout)?;
            self.read_into(0, &mut bytes)?;
            guard.unlock()?;
        }

        let layout = self.layout();
        bytes
            .chunks_exact(layout.record_size())
            .map(|slot| layout.decode_slot(slot))
            .collect()
    }
}

/// Aggregate view of a snapshot for status pages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub dead: usize,
    pub dying: usize,
    pub waiting: usize,
    pub processing: usize,
    pub requests_served: u64,
    pub errors_served: u64,
}

impl Summary {
    /// Workers that are alive (anything but Dead).
    pub fn live(&self) -> usize {
        self.dying + self.waiting + self.processing
    }
}

pub fn summarize(records: &[Record]) -> Summary {
    records.iter().fold(Summary::default(), |mut acc, r| {
        match r.status {
            Status::Dead => acc.dead += 1,
            Status::Dying => acc.dying += 1,
            Status::Waiting => acc.waiting += 1,
            Status::Processing => acc.processing += 1,
        }
        acc.requests_served = acc.requests_served.saturating_add(r.requests_served);
        acc.errors_served = acc.errors_served.saturating_add(r.errors_served);
        acc
    })
}
