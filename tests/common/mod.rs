//! Fork helpers shared by the integration tests.

#![allow(dead_code)]

use std::os::unix::io::RawFd;

/// One-byte signalling channel usable across `fork`.
pub struct Pipe {
    read: RawFd,
    write: RawFd,
}

impl Pipe {
    pub fn new() -> Self {
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        Pipe {
            read: fds[0],
            write: fds[1],
        }
    }

    pub fn signal(&self) {
        let byte = [1u8];
        assert_eq!(unsafe { libc::write(self.write, byte.as_ptr().cast(), 1) }, 1);
    }

    /// Block until `signal` was called in either process, for up to 10s.
    pub fn wait(&self) -> bool {
        let mut pfd = libc::pollfd {
            fd: self.read,
            events: libc::POLLIN,
            revents: 0,
        };
        if unsafe { libc::poll(&mut pfd, 1, 10_000) } != 1 {
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

pub struct Child {
    pid: libc::pid_t,
}

impl Child {
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// Exit code, or -1 if the child did not exit normally.
    pub fn wait(self) -> i32 {
        let mut status = 0;
        assert_eq!(unsafe { libc::waitpid(self.pid, &mut status, 0) }, self.pid);
        if libc::WIFEXITED(status) {
            libc::WEXITSTATUS(status)
        } else {
            -1
        }
    }
}

/// Run `body` in a forked child that `_exit`s with its return value.
pub fn fork_child<F: FnOnce() -> i32>(body: F) -> Child {
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(body)).unwrap_or(101);
        unsafe { libc::_exit(code) };
    }
    Child { pid }
}
