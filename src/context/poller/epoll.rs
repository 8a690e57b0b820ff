//! Linux `epoll`-based poller implementation.
//!
//! Responsibilities:
//! - Block the context owner until a deadline or a wake-up
//! - Let any thread interrupt that wait through an `eventfd`
//!
//! This backend is selected automatically on Linux targets.

use libc::{
    EFD_CLOEXEC, EFD_NONBLOCK, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLLIN, epoll_create1, epoll_ctl,
    epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Token attached to the wake-up descriptor.
const WAKE_TOKEN: u64 = u64::MAX;

/// Linux `epoll` poller.
///
/// Owns an `epoll` instance with a single registered descriptor: a
/// non-blocking `eventfd` used as the wake-up signal.
pub(crate) struct EpollPoller {
    /// Epoll file descriptor.
    epoll: RawFd,

    /// Wake-up eventfd.
    eventfd: RawFd,
}

impl EpollPoller {
    /// Creates the epoll instance and registers the wake-up eventfd.
    pub(crate) fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let eventfd = unsafe { libc::eventfd(0, EFD_NONBLOCK | EFD_CLOEXEC) };
        if eventfd < 0 {
            let error = io::Error::last_os_error();
            unsafe { libc::close(epoll) };
            return Err(error);
        }

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        let rc = unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, eventfd, &mut event) };
        if rc != 0 {
            let error = io::Error::last_os_error();
            unsafe {
                libc::close(eventfd);
                libc::close(epoll);
            }
            return Err(error);
        }

        Ok(Self { epoll, eventfd })
    }

    /// Wakes a thread blocked in [`wait`](Self::wait), or makes the next
    /// wait return immediately.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.eventfd, &buf as *const u64 as *const _, 8);
        }
    }

    /// Blocks until woken or until `timeout` elapses (`None` = forever).
    ///
    /// Returns `true` if the wait ended because of a wake-up. Interruption by
    /// a signal is reported as a plain timeout.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let mut event = epoll_event { events: 0, u64: 0 };
        let millis = super::timeout_millis(timeout);

        let n = unsafe { epoll_wait(self.epoll, &mut event, 1, millis) };

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

    /// Resets the eventfd counter so the next wait blocks again.
    fn drain(&self) {
        let mut buf: u64 = 0;
        unsafe {
            libc::read(self.eventfd, &mut buf as *mut u64 as *mut _, 8);
        }
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.eventfd);
            libc::close(self.epoll);
        }
    }
}
