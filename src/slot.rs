//! Per-worker view of one scoreboard slot.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::record::{now_micros, Record, RecordUpdate, Status};
use crate::shm::layout;
use crate::shm::{LockMode, Region};

/// A typed handle on one slot: a local, unpublished copy of the record plus
/// the range needed to publish it.
///
/// Mutations (`update`, `reset`, the request helpers) only touch the local
/// copy. [`flush`](SlotHandle::flush) makes it visible to every process
/// mapping the region.
pub struct SlotHandle {
    region: Arc<Region>,
    index: usize,
    offset: usize,
    len: usize,
    local: Record,
}

impl SlotHandle {
    /// Bind a handle to `index`. The local copy starts out all-default; it
    /// is not read from shared memory (see [`load`](Self::load)).
    pub fn new(region: Arc<Region>, index: usize) -> Result<Self> {
        let (offset, len) = region.slot_offset(index)?;
        Ok(SlotHandle {
            region,
            index,
            offset,
            len,
            local: Record::EMPTY,
        })
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The local copy, including changes not yet flushed.
    #[inline]
    pub fn record(&self) -> &Record {
        &self.local
    }

    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    /// Return the local copy to the all-default record.
    pub fn reset(&mut self) {
        self.local = Record::EMPTY;
    }

    /// Overwrite the local fields present in `update`.
    pub fn update(&mut self, update: RecordUpdate) {
        self.local.apply(&update);
    }

    /// Mark the start of a request: Processing, timestamp now, one more
    /// request served.
    pub fn begin_request(&mut self) {
        self.local.status = Status::Processing;
        self.local.last_request_started_at = now_micros();
        self.local.requests_served = self.local.requests_served.saturating_add(1);
    }

    /// Mark the end of a request and go back to Waiting.
    pub fn finish_request(&mut self, ok: bool) {
        if !ok {
            self.local.errors_served = self.local.errors_served.saturating_add(1);
        }
        self.local.status = Status::Waiting;
    }

    /// Publish the local copy, waiting for the slot lock as long as the
    /// region's configured timeout allows.
    pub fn flush(&self) -> Result<()> {
        self.flush_timeout(self.region.lock_timeout())
    }

    /// Publish the local copy under an exclusive lock over exactly this
    /// slot's bytes. On failure the local copy is untouched and the call can
    /// be retried.
    pub fn flush_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let encoded = layout::encode(&self.local);
        let guard = self
            .region
            .lock_range(self.offset, self.len, LockMode::Exclusive, timeout)?;
        self.region.write_raw(self.offset, &encoded)?;
        guard.unlock()
    }

    /// Replace the local copy with the slot's published record.
    pub fn load(&mut self) -> Result<()> {
        let mut buf = vec![0u8; self.len];
        {
            let _guard = self.region.lock_range(
                self.offset,
                self.len,
                LockMode::Shared,
                self.region.lock_timeout(),
            )?;
            self.region.read_into(self.offset, &mut buf)?;
        }
        self.local = self.region.layout().decode_slot(&buf)?;
        Ok(())
    }
}

impl std::fmt::Debug for SlotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotHandle")
            .field("index", &self.index)
            .field("local", &self.local)
            .finish()
    }
}
