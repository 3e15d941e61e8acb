//! Master-process facade tying the region, allocator and reaper together.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::allocator::SlotAllocator;
use crate::config::RegionConfig;
use crate::error::Result;
use crate::reaper;
use crate::record::Record;
use crate::shm::Region;
use crate::slot::SlotHandle;
use crate::snapshot::{summarize, Summary};

/// The master's view of the worker pool.
///
/// Allocation, release and sweeping all go through one mutex, so a
/// multi-threaded supervisor can never release a slot that a concurrent
/// sweep is also reclaiming.
pub struct Scoreboard {
    region: Arc<Region>,
    slots: Mutex<SlotAllocator>,
}

impl Scoreboard {
    /// Create the backing region. Do this before spawning any worker.
    pub fn new(config: RegionConfig) -> Result<Self> {
        Ok(Self::from_region(Arc::new(Region::with_config(config)?)))
    }

    /// Wrap an existing region; every slot starts out free.
    pub fn from_region(region: Arc<Region>) -> Self {
        Scoreboard {
            slots: Mutex::new(SlotAllocator::new(Arc::clone(&region))),
            region,
        }
    }

    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Reserve a slot for a worker about to be spawned.
    pub fn allocate(&self) -> Result<SlotHandle> {
        self.slots.lock().allocate()
    }

    pub fn release(&self, handle: SlotHandle) -> Result<()> {
        self.slots.lock().release(handle)
    }

    pub fn release_index(&self, index: usize) -> Result<()> {
        self.slots.lock().release_index(index)
    }

    /// A fresh handle on slot `index`, for a worker that inherited the region
    /// and was told its index. Does not change the allocator.
    pub fn worker_slot(&self, index: usize) -> Result<SlotHandle> {
        SlotHandle::new(Arc::clone(&self.region), index)
    }

    pub fn sweep<F>(&self, is_terminal: F) -> Result<Vec<usize>>
    where
        F: Fn(&Record) -> bool,
    {
        reaper::sweep(&mut self.slots.lock(), is_terminal)
    }

    pub fn sweep_dead(&self) -> Result<Vec<usize>> {
        reaper::sweep_dead(&mut self.slots.lock())
    }

    pub fn snapshot(&self) -> Result<Vec<Record>> {
        self.region.snapshot()
    }

    pub fn summary(&self) -> Result<Summary> {
        Ok(summarize(&self.snapshot()?))
    }

    pub fn free_count(&self) -> usize {
        self.slots.lock().free_count()
    }

    pub fn used_indices(&self) -> Vec<usize> {
        self.slots.lock().used_indices()
    }
}
