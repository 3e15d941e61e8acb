/// Advisory byte-range locks over the region's backing file.
///
/// Two layers guard every range:
///   1. an in-process range table (parking_lot mutex + condvar) so threads
///      sharing one `Region` never hold overlapping ranges at once, whatever
///      the mode;
///   2. a POSIX `fcntl` record lock on the backing file, which is what other
///      processes observe.
///
/// POSIX record locks belong to the process, not the descriptor, and are not
/// reference counted. Layer 1 keeps a process from ever unlocking bytes that
/// another of its own threads still relies on. Across processes the usual
/// rule holds: two requests conflict iff their ranges overlap and at least
/// one is exclusive.
///
/// A forked child does not inherit its parent's fcntl locks, so the range
/// table is per process too: the first acquire in a new pid replaces the
/// inherited table with an empty one.
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{Result, ScoreboardError};

/// First sleep between non-blocking lock attempts when a timeout is set.
const MIN_BACKOFF: Duration = Duration::from_micros(200);
/// Upper bound on the sleep between attempts.
const MAX_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Read lock. Compatible with other shared locks.
    Shared,
    /// Write lock. Conflicts with every overlapping lock.
    Exclusive,
}

impl LockMode {
    fn fcntl_type(self) -> libc::c_short {
        match self {
            LockMode::Shared => libc::F_RDLCK as libc::c_short,
            LockMode::Exclusive => libc::F_WRLCK as libc::c_short,
        }
    }
}

#[inline]
fn overlaps(a_off: usize, a_len: usize, b_off: usize, b_len: usize) -> bool {
    a_off < b_off + b_len && b_off < a_off + a_len
}

/// Ranges currently held by threads of this process.
#[derive(Default)]
struct RangeTable {
    held: Mutex<Vec<(usize, usize)>>,
    released: Condvar,
}

impl RangeTable {
    /// Wait until no held range overlaps `offset+len`, then record it.
    /// Returns `false` if `deadline` passes first.
    fn claim(&self, offset: usize, len: usize, deadline: Option<Instant>) -> bool {
        let conflicts =
            |held: &[(usize, usize)]| held.iter().any(|&(o, l)| overlaps(o, l, offset, len));

        let mut held = self.held.lock();
        while conflicts(&held) {
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut held, deadline).timed_out()
                        && conflicts(&held)
                    {
                        return false;
                    }
                }
                None => self.released.wait(&mut held),
            }
        }
        held.push((offset, len));
        true
    }

    fn release(&self, offset: usize, len: usize) {
        let mut held = self.held.lock();
        if let Some(pos) = held.iter().position(|&r| r == (offset, len)) {
            held.swap_remove(pos);
        }
        drop(held);
        self.released.notify_all();
    }
}

/// Byte-range lock bound to one open descriptor of the backing file.
pub struct RangeLock {
    fd: RawFd,
    /// Pid whose threads `table` describes.
    owner: AtomicU32,
    table: Mutex<Arc<RangeTable>>,
}

impl RangeLock {
    /// `fd` must stay open for as long as this lock is used.
    pub(crate) fn new(fd: RawFd) -> Self {
        RangeLock {
            fd,
            owner: AtomicU32::new(std::process::id()),
            table: Mutex::new(Arc::new(RangeTable::default())),
        }
    }

    /// The range table of the calling process. Ranges recorded before a
    /// fork belong to threads the child does not have, so they are dropped.
    fn table(&self, pid: u32) -> Arc<RangeTable> {
        let mut table = self.table.lock();
        let previous = self.owner.swap(pid, Ordering::Relaxed);
        if previous != pid {
            debug!(parent = previous, pid, "resetting range table after fork");
            *table = Arc::new(RangeTable::default());
        }
        Arc::clone(&table)
    }

    /// Lock `offset+len` in `mode`, waiting at most `timeout` (forever when
    /// `None`). `len` must be non-zero; fcntl would read 0 as "to end of file".
    pub fn acquire(
        &self,
        offset: usize,
        len: usize,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> Result<RangeGuard<'_>> {
        debug_assert!(len > 0);
        let deadline = timeout.map(|t| Instant::now() + t);
        let timed_out = || ScoreboardError::LockTimeout {
            offset,
            len,
            mode,
            timeout: timeout.unwrap_or_default(),
        };

        let pid = std::process::id();
        let table = self.table(pid);
        if !table.claim(offset, len, deadline) {
            warn!(offset, len, ?mode, "in-process range lock timed out");
            return Err(timed_out());
        }

        match self.os_lock(offset, len, mode, deadline) {
            Ok(true) => Ok(RangeGuard {
                lock: self,
                table,
                pid,
                offset,
                len,
                mode,
                held: true,
            }),
            Ok(false) => {
                table.release(offset, len);
                warn!(offset, len, ?mode, "range lock timed out");
                Err(timed_out())
            }
            Err(e) => {
                table.release(offset, len);
                Err(e.into())
            }
        }
    }

    /// Take the fcntl lock. `Ok(false)` means the deadline passed.
    fn os_lock(
        &self,
        offset: usize,
        len: usize,
        mode: LockMode,
        deadline: Option<Instant>,
    ) -> io::Result<bool> {
        let fl = flock(mode.fcntl_type(), offset, len);

        let Some(deadline) = deadline else {
            loop {
                // SAFETY: `fl` is a valid flock struct and `fd` is open.
                if unsafe { libc::fcntl(self.fd, libc::F_SETLKW, &fl) } == 0 {
                    return Ok(true);
                }
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        };

        // fcntl has no timed wait: poll F_SETLK with exponential backoff.
        let mut backoff = MIN_BACKOFF;
        loop {
            // SAFETY: as above.
            if unsafe { libc::fcntl(self.fd, libc::F_SETLK, &fl) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) | Some(libc::EACCES) => {}
                _ => return Err(err),
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    fn os_unlock(&self, offset: usize, len: usize) -> io::Result<()> {
        let fl = flock(libc::F_UNLCK as libc::c_short, offset, len);
        // SAFETY: `fl` is a valid flock struct and `fd` is open.
        if unsafe { libc::fcntl(self.fd, libc::F_SETLK, &fl) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

fn flock(l_type: libc::c_short, offset: usize, len: usize) -> libc::flock {
    // SAFETY: flock is plain old data; all-zero is a valid value.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = l_type;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = offset as libc::off_t;
    fl.l_len = len as libc::off_t;
    fl
}

/// A held byte-range lock. Released by [`RangeGuard::unlock`] or on drop.
#[must_use = "the range is unlocked as soon as the guard is dropped"]
pub struct RangeGuard<'a> {
    lock: &'a RangeLock,
    table: Arc<RangeTable>,
    /// Process that took the lock. A copy dropped in a forked child owns
    /// neither the fcntl lock nor a live table entry.
    pid: u32,
    offset: usize,
    len: usize,
    mode: LockMode,
    held: bool,
}

impl RangeGuard<'_> {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Release the range, reporting a failed unlock instead of only logging it.
    pub fn unlock(mut self) -> Result<()> {
        self.release().map_err(Into::into)
    }

    fn release(&mut self) -> io::Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        if self.pid != std::process::id() {
            return Ok(());
        }
        let res = self.lock.os_unlock(self.offset, self.len);
        self.table.release(self.offset, self.len);
        res
    }
}

impl Drop for RangeGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(offset = self.offset, len = self.len, error = %e, "failed to unlock range");
        }
    }
}
