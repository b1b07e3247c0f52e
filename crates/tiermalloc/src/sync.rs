//! Spin synchronisation for the central cache shards.
//!
//! Central-cache critical sections are a few link writes and one map lookup,
//! short enough that a test-and-set flag with a cooperative yield beats a
//! full mutex. The page cache, whose critical sections include system calls,
//! uses `parking_lot::Mutex` instead.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// A test-and-set spinlock owning its protected value.
///
/// Acquisition spins with [`thread::yield_now`] between attempts. The flag is
/// acquired with `Acquire` ordering and released with `Release`, which is the
/// only memory ordering the protected free lists need: every link write
/// happens inside the critical section.
pub struct SpinMutex<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    /// Creates an unlocked mutex holding `value`.
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, spinning until it is free.
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        while self.locked.swap(true, Ordering::Acquire) {
            thread::yield_now();
        }
        SpinMutexGuard { lock: self }
    }
}

/// RAII guard; the lock is released on every exit path when this drops.
pub struct SpinMutexGuard<'a, T> {
    lock: &'a SpinMutex<T>,
}

impl<T> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the flag is held, so this guard has exclusive access.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the flag is held, so this guard has exclusive access.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
