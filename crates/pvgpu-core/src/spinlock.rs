//! Spinlock that can only be taken with a bound.
//!
//! Guards the per-engine submission slot and the tasklet body. There is no
//! blocking `lock()`: every acquisition either succeeds immediately or
//! gives up after a caller-supplied timeout.

use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Pause hints between attempts, doubled up to this cap.
const MAX_BACKOFF: u32 = 64;

pub struct SpinLock<T> {
    held: AtomicBool,
    value: UnsafeCell<T>,
}

// Safety: `value` is only reachable through a guard, and `held` admits one
// guard at a time.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// One attempt, no spinning.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        match self
            .held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => Some(SpinLockGuard { owner: self }),
            Err(_) => None,
        }
    }

    /// Retry with exponential pause backoff until `timeout` has passed.
    pub fn try_lock_for(&self, timeout: Duration) -> Option<SpinLockGuard<'_, T>> {
        let deadline = Instant::now() + timeout;
        let mut backoff = 1;
        loop {
            if let Some(guard) = self.try_lock() {
                return Some(guard);
            }
            if Instant::now() >= deadline {
                return None;
            }
            // wait for a release before retrying the CAS
            while self.held.load(Ordering::Relaxed) && backoff < MAX_BACKOFF {
                for _ in 0..backoff {
                    hint::spin_loop();
                }
                backoff *= 2;
            }
            hint::spin_loop();
        }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

pub struct SpinLockGuard<'a, T> {
    owner: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: this guard is the only one.
        unsafe { &*self.owner.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: this guard is the only one.
        unsafe { &mut *self.owner.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.owner.held.store(false, Ordering::Release);
    }
}
