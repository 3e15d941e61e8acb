//! Master-side bookkeeping of which slots are assigned.
//!
//! This state lives only in the master's address space. Workers never see
//! it; they only touch the record at their own index.

use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashSet;
use tracing::debug;

use crate::error::{Result, ScoreboardError};
use crate::shm::Region;
use crate::slot::SlotHandle;

/// Hands out slot indices so that no index ever has two occupants.
///
/// Not synchronized: call it from a single control loop, or wrap it in a
/// mutex shared with the reaper (see [`Scoreboard`](crate::Scoreboard)).
///
/// ```ignore
/// let mut slots = SlotAllocator::new(region);
/// let a = slots.allocate()?;   // index 0
/// let b = slots.allocate()?;   // index 1
/// slots.release(a)?;           // 0 is free again
/// let c = slots.allocate()?;   // index 0 (recycled)
/// ```
pub struct SlotAllocator {
    region: Arc<Region>,
    /// Free indices, popped from the back. Starts as `capacity-1 ..= 0` so
    /// a fresh allocator hands out 0, 1, 2, ...
    free_list: Vec<usize>,
    used: HashSet<usize, RandomState>,
}

impl SlotAllocator {
    /// All of `region`'s slots start out free.
    pub fn new(region: Arc<Region>) -> Self {
        let capacity = region.capacity();
        SlotAllocator {
            region,
            free_list: (0..capacity).rev().collect(),
            used: HashSet::with_capacity_and_hasher(capacity, RandomState::new()),
        }
    }

    /// Take a free slot. Fails with `Exhausted` when every slot is assigned;
    /// the caller should refuse to spawn rather than treat it as fatal.
    pub fn allocate(&mut self) -> Result<SlotHandle> {
        let index = self.free_list.pop().ok_or(ScoreboardError::Exhausted {
            capacity: self.capacity(),
        })?;
        match SlotHandle::new(Arc::clone(&self.region), index) {
            Ok(handle) => {
                self.used.insert(index);
                debug!(index, free = self.free_list.len(), "allocated slot");
                Ok(handle)
            }
            Err(e) => {
                self.free_list.push(index);
                Err(e)
            }
        }
    }

    /// Return `handle`'s slot to the free set.
    pub fn release(&mut self, handle: SlotHandle) -> Result<()> {
        self.release_index(handle.index())
    }

    /// Return slot `index` to the free set. Releasing a slot that is already
    /// free is a bookkeeping bug and fails with `DoubleFree`.
    pub fn release_index(&mut self, index: usize) -> Result<()> {
        if index >= self.capacity() {
            return Err(ScoreboardError::Index {
                index,
                capacity: self.capacity(),
            });
        }
        if !self.used.remove(&index) {
            return Err(ScoreboardError::DoubleFree { index });
        }
        self.free_list.push(index);
        debug!(index, free = self.free_list.len(), "released slot");
        Ok(())
    }

    pub fn is_used(&self, index: usize) -> bool {
        self.used.contains(&index)
    }

    pub fn is_free(&self, index: usize) -> bool {
        index < self.capacity() && !self.is_used(index)
    }

    /// Assigned indices in ascending order.
    pub fn used_indices(&self) -> Vec<usize> {
        let mut used: Vec<usize> = self.used.iter().copied().collect();
        used.sort_unstable();
        used
    }

    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }
}
