//! Helpers for tests that fork a second process against the same region.

use std::os::unix::io::RawFd;

/// How long a blocked `Pipe::wait` gives up after, so an orphaned child
/// never outlives a failed test for long.
const WAIT_TIMEOUT_MS: libc::c_int = 10_000;

/// A one-byte signalling channel usable across `fork`.
pub(crate) struct Pipe {
    read: RawFd,
    write: RawFd,
}

impl Pipe {
    pub(crate) fn new() -> Self {
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        Pipe {
            read: fds[0],
            write: fds[1],
        }
    }

    pub(crate) fn signal(&self) {
        let byte = [1u8];
        let n = unsafe { libc::write(self.write, byte.as_ptr().cast(), 1) };
        assert_eq!(n, 1);
    }

    /// Block until `signal` was called in either process. Returns `false` on
    /// timeout.
    pub(crate) fn wait(&self) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.read,
            events: libc::POLLIN,
            revents: 0,
        };
        if unsafe { libc::poll(&mut pfd, 1, WAIT_TIMEOUT_MS) } != 1 {
            return false;
        }
        let mut byte = [0u8];
        unsafe { libc::read(self.read, byte.as_mut_ptr().cast(), 1) == 1 }
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
            libc::close(self.write);
        }
    }
}

pub(crate) struct Child {
    pid: libc::pid_t,
}

impl Child {
    pub(crate) fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// Wait for the child and return its exit code (-1 if it did not exit
    /// normally).
    pub(crate) fn wait(self) -> i32 {
        let mut status: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(self.pid, &mut status, 0) };
        assert_eq!(rc, self.pid);
        if libc::WIFEXITED(status) {
            libc::WEXITSTATUS(status)
        } else {
            -1
        }
    }
}

/// Run `body` in a forked child and `_exit` with its return value.
pub(crate) fn fork_child<F: FnOnce() -> i32>(body: F) -> Child {
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body)).unwrap_or(101);
        unsafe { libc::_exit(code) };
    }
    Child { pid }
}
