/// Shared memory region management using mmap.
///
/// A region is a file of `capacity * record_size` bytes (under `/dev/shm`
/// on Linux) mapped `MAP_SHARED`, so forked children and processes that
/// attach by path see the same bytes. The file descriptor doubles as the
/// target of the byte-range locks.
///
/// A process maps each backing file at most once. POSIX record locks taken
/// through two descriptors of one process never conflict, and closing either
/// descriptor drops both sets, so a second mapping is refused.
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use memmap2::{MmapOptions, MmapRaw};
use parking_lot::{const_mutex, Mutex};
use tracing::debug;

use super::layout::RecordLayout;
use super::lock::{LockMode, RangeGuard, RangeLock};
use crate::config::RegionConfig;
use crate::error::{Result, ScoreboardError};

/// Device and inode of a backing file.
type FileId = (u64, u64);

/// Backing files mapped by a live `Region` in this process.
static MAPPED: Mutex<Vec<FileId>> = const_mutex(Vec::new());

fn file_id(meta: &fs::Metadata) -> FileId {
    (meta.dev(), meta.ino())
}

/// The backing memory for all slots plus its byte-range lock.
pub struct Region {
    map: MmapRaw,
    lock: RangeLock,
    // Keeps the descriptor used by `lock` open. Closing any descriptor of the
    // file drops this process's record locks on it.
    _file: File,
    path: PathBuf,
    capacity: usize,
    layout: RecordLayout,
    lock_timeout: Option<Duration>,
    /// Pid of the creating process; only it unlinks the file on drop.
    owner_pid: Option<u32>,
    file_id: FileId,
}

impl Region {
    /// Create a region with default settings for `capacity` slots.
    pub fn create(capacity: usize, layout: RecordLayout) -> Result<Self> {
        Self::with_config(RegionConfig::new(capacity).with_layout(layout))
    }

    /// Create and zero a new region. Any existing file at the same path is
    /// truncated.
    pub fn with_config(mut config: RegionConfig) -> Result<Self> {
        let path = config.resolve_path();
        let alloc_err = |source: io::Error| ScoreboardError::Allocation {
            path: path.clone(),
            source,
        };

        if config.capacity == 0 {
            return Err(alloc_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "capacity must be at least one slot",
            )));
        }
        let size = config.layout.region_size(config.capacity).ok_or_else(|| {
            alloc_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "region size overflows usize",
            ))
        })?;

        fs::create_dir_all(&config.dir).map_err(alloc_err)?;

        let mut mapped = MAPPED.lock();
        // Truncating a file this process still maps would wipe live slots.
        if let Ok(meta) = fs::metadata(&path) {
            if mapped.contains(&file_id(&meta)) {
                return Err(ScoreboardError::AlreadyMapped { path: path.clone() });
            }
        }
        let (file, map, id) = match create_mapping(&path, size) {
            Ok(created) => created,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(alloc_err(e));
            }
        };
        mapped.push(id);
        drop(mapped);

        debug!(
            path = %path.display(),
            capacity = config.capacity,
            record_size = config.layout.record_size(),
            "created scoreboard region"
        );

        Ok(Region {
            map,
            lock: RangeLock::new(file.as_raw_fd()),
            _file: file,
            path,
            capacity: config.capacity,
            layout: config.layout,
            lock_timeout: config.lock_timeout,
            owner_pid: Some(std::process::id()),
            file_id: id,
        })
    }

    /// Map an existing region by path. The capacity is derived from the
    /// file size, which must be a whole number of `layout` strides.
    ///
    /// For processes that did not inherit the region. Fails with
    /// `AlreadyMapped` if this process already maps the file, which includes
    /// the creator and any child forked from it while it held the region.
    pub fn attach(path: impl AsRef<Path>, layout: RecordLayout) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Checked before opening: closing even a rejected descriptor would
        // release every lock this process holds on the file.
        let mut mapped = MAPPED.lock();
        if mapped.contains(&file_id(&fs::metadata(&path)?)) {
            return Err(ScoreboardError::AlreadyMapped { path });
        }
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let meta = file.metadata()?;
        let id = file_id(&meta);

        let size = meta.len() as usize;
        if size == 0 || size % layout.record_size() != 0 {
            return Err(ScoreboardError::LayoutMismatch {
                expected: layout.record_size(),
                actual: size,
            });
        }

        let map = MmapOptions::new()
            .len(size)
            .map_raw(&file)
            .map_err(|source| ScoreboardError::Allocation {
                path: path.clone(),
                source,
            })?;
        mapped.push(id);
        drop(mapped);

        debug!(path = %path.display(), size, "attached scoreboard region");

        Ok(Region {
            map,
            lock: RangeLock::new(file.as_raw_fd()),
            _file: file,
            path,
            capacity: size / layout.record_size(),
            layout,
            lock_timeout: None,
            owner_pid: None,
            file_id: id,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    /// Total mapped bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.capacity * self.layout.record_size()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Timeout applied by `flush` and `snapshot`.
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout
    }

    pub fn set_lock_timeout(&mut self, timeout: Option<Duration>) {
        self.lock_timeout = timeout;
    }

    /// Byte range `(offset, length)` of slot `index`.
    pub fn slot_offset(&self, index: usize) -> Result<(usize, usize)> {
        if index >= self.capacity {
            return Err(ScoreboardError::Index {
                index,
                capacity: self.capacity,
            });
        }
        let len = self.layout.record_size();
        Ok((index * len, len))
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        let size = self.size();
        match offset.checked_add(len) {
            Some(end) if len > 0 && end <= size => Ok(()),
            _ => Err(ScoreboardError::Range { offset, len, size }),
        }
    }

    /// Lock `offset+len` in `mode`. See [`RangeLock::acquire`].
    pub fn lock_range(
        &self,
        offset: usize,
        len: usize,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> Result<RangeGuard<'_>> {
        self.check_range(offset, len)?;
        self.lock.acquire(offset, len, mode, timeout)
    }

    /// Copy `len` bytes out of the region. Caller holds a covering lock.
    pub fn read_raw(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(offset, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` from the region at `offset`. Caller holds a covering lock.
    pub fn read_into(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        // SAFETY: range checked above; the mapping lives as long as `self`.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.map.as_ptr().add(offset),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        Ok(())
    }

    /// Copy `bytes` into the region at `offset`. Caller holds an exclusive
    /// lock covering the range.
    pub fn write_raw(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_range(offset, bytes.len())?;
        // SAFETY: range checked above; concurrent writers are excluded by
        // the caller's range lock.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.map.as_mut_ptr().add(offset),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Whether this process created the region (and will unlink it).
    pub fn is_owner(&self) -> bool {
        self.owner_pid == Some(std::process::id())
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        {
            let mut mapped = MAPPED.lock();
            if let Some(pos) = mapped.iter().position(|&id| id == self.file_id) {
                mapped.swap_remove(pos);
            }
        }
        // A forked child drops its inherited copy too; only the creator
        // removes the file.
        if self.is_owner() {
            let _ = fs::remove_file(&self.path);
            debug!(path = %self.path.display(), "unlinked scoreboard region");
        }
    }
}

/// Create or truncate the backing file, reserve `size` bytes and map them.
fn create_mapping(path: &Path, size: usize) -> io::Result<(File, MmapRaw, FileId)> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_len(size as u64)?;
    reserve(&file, size)?;

    let map = MmapOptions::new().len(size).map_raw(&file)?;
    // SAFETY: fresh mapping of exactly `size` bytes.
    unsafe { std::ptr::write_bytes(map.as_mut_ptr(), 0, size) };
    let id = file_id(&file.metadata()?);
    Ok((file, map, id))
}

/// Make the filesystem commit the pages now, so running out of shared memory
/// fails here instead of as SIGBUS on first touch.
#[cfg(target_os = "linux")]
fn reserve(file: &File, size: usize) -> io::Result<()> {
    // SAFETY: valid open descriptor.
    let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, size as libc::off_t) };
    match rc {
        0 => Ok(()),
        // Filesystems without fallocate support; set_len already sized the file.
        libc::EOPNOTSUPP | libc::EINVAL => Ok(()),
        errno => Err(io::Error::from_raw_os_error(errno)),
    }
}

#[cfg(not(target_os = "linux"))]
fn reserve(_file: &File, _size: usize) -> io::Result<()> {
    Ok(())
}
