//! Reclaims slots whose workers have exited.

use tracing::info;

use crate::allocator::SlotAllocator;
use crate::error::Result;
use crate::record::Record;
use crate::slot::SlotHandle;

/// Default terminal test: the worker reported `Dead`.
pub fn is_dead(record: &Record) -> bool {
    record.status.is_terminal()
}

/// Reset and free every assigned slot whose record satisfies `is_terminal`.
///
/// Slots that are already free are skipped, so running `sweep` again with
/// nothing changed releases nothing. Returns the reclaimed indices in
/// ascending order.
///
/// A slot is released only after its reset record has been flushed. If a
/// flush fails the sweep stops there: earlier slots stay reclaimed, the
/// failing slot and later ones stay assigned, and a retry picks them up.
pub fn sweep<F>(allocator: &mut SlotAllocator, is_terminal: F) -> Result<Vec<usize>>
where
    F: Fn(&Record) -> bool,
{
    let records = allocator.region().snapshot()?;
    let mut reclaimed = Vec::new();

    for (index, record) in records.iter().enumerate() {
        if !allocator.is_used(index) || !is_terminal(record) {
            continue;
        }
        let mut handle = SlotHandle::new(allocator.region().clone(), index)?;
        handle.reset();
        handle.flush()?;
        allocator.release(handle)?;
        info!(index, pid = record.pid, "reclaimed slot");
        reclaimed.push(index);
    }
    Ok(reclaimed)
}

/// [`sweep`] with the [`is_dead`] predicate.
pub fn sweep_dead(allocator: &mut SlotAllocator) -> Result<Vec<usize>> {
    sweep(allocator, is_dead)
}
