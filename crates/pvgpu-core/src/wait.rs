//! Bounded two-tier wait.
//!
//! A short busy-spin catches replies the host turns around immediately;
//! after that the waiter yields (or sleeps for `poll_interval`) until the
//! timeout expires. Callers supply the completion predicate.

use std::hint;
use std::thread;
use std::time::{Duration, Instant};

/// The condition did not become true within the bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundedWait {
    spin: Duration,
    timeout: Duration,
    poll_interval: Duration,
}

impl BoundedWait {
    /// Spin for `spin`, then poll for up to `timeout` more.
    pub const fn new(spin: Duration, timeout: Duration) -> Self {
        Self {
            spin,
            timeout,
            poll_interval: Duration::ZERO,
        }
    }

    /// Busy-spin for the whole bound. For waits measured in microseconds.
    pub const fn spin_only(timeout: Duration) -> Self {
        Self::new(timeout, Duration::ZERO)
    }

    /// Sleep this long between polls instead of yielding.
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Upper bound on how long [`wait`](Self::wait) can block.
    pub fn total(&self) -> Duration {
        self.spin + self.timeout
    }

    pub fn wait<F: FnMut() -> bool>(&self, mut done: F) -> Result<(), WaitTimeout> {
        if done() {
            return Ok(());
        }

        let start = Instant::now();
        while start.elapsed() < self.spin {
            if done() {
                return Ok(());
            }
            hint::spin_loop();
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            if done() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WaitTimeout);
            }
            if self.poll_interval.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(self.poll_interval.min(deadline - now));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_immediate() {
        let w = BoundedWait::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(w.wait(|| true), Ok(()));
    }

    #[test]
    fn test_times_out() {
        let w = BoundedWait::new(Duration::from_micros(5), Duration::from_millis(2));
        let start = Instant::now();
        assert_eq!(w.wait(|| false), Err(WaitTimeout));
        assert!(start.elapsed() >= Duration::from_millis(2));
    }

    #[test]
    fn test_condition_after_some_polls() {
        let calls = AtomicU32::new(0);
        let w = BoundedWait::new(Duration::ZERO, Duration::from_secs(5));
        let r = w.wait(|| calls.fetch_add(1, Ordering::Relaxed) >= 10);
        assert_eq!(r, Ok(()));
        assert!(calls.load(Ordering::Relaxed) >= 11);
    }

    #[test]
    fn test_cross_thread() {
        let flag = Arc::new(AtomicBool::new(false));
        let f2 = Arc::clone(&flag);
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(1));
            f2.store(true, Ordering::Release);
        });
        let w = BoundedWait::new(Duration::from_micros(5), Duration::from_secs(5))
            .with_poll_interval(Duration::from_micros(50));
        assert_eq!(w.wait(|| flag.load(Ordering::Acquire)), Ok(()));
        h.join().unwrap();
    }
}
