//! Platform-specific wakeable wait.
//!
//! The context does not multiplex I/O. It only needs to block its owner
//! thread until either the next timer expires or another thread attaches a
//! source or asks the loop to quit. The poller provides exactly that: a
//! timed wait that can be interrupted from any thread.
//!
//! The concrete implementation is selected at compile time
//! depending on the target operating system.

use std::time::Duration;

#[cfg(target_os = "linux")]
mod epoll;

#[cfg(all(unix, not(target_os = "linux")))]
mod pipe;

#[cfg(target_os = "linux")]
pub(crate) type Poller = epoll::EpollPoller;

#[cfg(all(unix, not(target_os = "linux")))]
pub(crate) type Poller = pipe::PipePoller;

#[cfg(not(unix))]
compile_error!("orbit only supports unix targets");

/// Converts an optional wait duration into a poll(2)-style millisecond timeout.
///
/// `None` blocks indefinitely (`-1`). Sub-millisecond remainders are rounded
/// up so a pending timer never causes a zero-length busy wait.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(duration) => {
            let millis = duration.as_nanos().div_ceil(1_000_000);
            i32::try_from(millis).unwrap_or(i32::MAX)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_wait_maps_to_minus_one() {
        assert_eq!(timeout_millis(None), -1);
    }

    #[test]
    fn partial_millis_round_up() {
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(Some(Duration::from_micros(1))), 1);
        assert_eq!(timeout_millis(Some(Duration::from_micros(10_500))), 11);
    }

    #[test]
    fn huge_timeouts_saturate() {
        assert_eq!(timeout_millis(Some(Duration::from_secs(u64::MAX))), i32::MAX);
    }

    #[test]
    fn wake_interrupts_wait() {
        let poller = Poller::new().unwrap();
        poller.wake();

        let start = std::time::Instant::now();
        poller.wait(Some(Duration::from_secs(5))).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn wait_times_out_without_wake() {
        let poller = Poller::new().unwrap();

        let start = std::time::Instant::now();
        poller.wait(Some(Duration::from_millis(20))).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
