//! Portable `poll(2)` + self-pipe poller for unix targets without `epoll`.

use libc::{F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_NONBLOCK, POLLIN, fcntl, pollfd};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Self-pipe poller.
///
/// Wake-ups write one byte into the pipe; waits poll the read end.
pub(crate) struct PipePoller {
    read: RawFd,
    write: RawFd,
}

impl PipePoller {
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];

        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }

        for fd in fds {
            unsafe {
                let flags = fcntl(fd, F_GETFL);
                fcntl(fd, F_SETFL, flags | O_NONBLOCK);
                fcntl(fd, F_SETFD, FD_CLOEXEC);
            }
        }

        Ok(Self {
            read: fds[0],
            write: fds[1],
        })
    }

    pub(crate) fn wake(&self) {
        let byte = 1u8;
        unsafe {
            libc::write(self.write, &byte as *const u8 as *const _, 1);
        }
    }

    pub(crate) fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let mut fd = pollfd {
            fd: self.read,
            events: POLLIN,
            revents: 0,
        };

        let n = unsafe { libc::poll(&mut fd, 1, super::timeout_millis(timeout)) };

        if n < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(error);
        }

        if n == 0 {
            return Ok(false);
        }

        self.drain();
        Ok(true)
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe { libc::read(self.read, buf.as_mut_ptr() as *mut _, buf.len()) };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Drop for PipePoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
            libc::close(self.write);
        }
    }
}
