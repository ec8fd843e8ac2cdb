// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Async mutex that can live in a `static`.
//!
//! This implements a lock guarding a value of type `T`. If you don't want to
//! store a value inside the mutex, use a `Mutex<()>`; the peripheral
//! managers do this to serialize access to a controller whose real state
//! lives in hardware.
//!
//! Waiting tasks park on a [`Notify`] and retry when the holder unlocks. This
//! makes the mutex *unfair*: when several tasks wait, whichever is polled
//! first after the unlock wins, and a task that unlocks and immediately
//! relocks can beat the waiters. In exchange the mutex is `const`
//! constructible and needs no pinning.
//!
//! # Timeouts
//!
//! There is no dedicated "lock with timeout" operation. Wrap
//! [`Mutex::lock`] in [`with_timeout`][crate::time::with_timeout] instead:
//!
//! ```ignore
//! let Some(guard) = with_timeout(Millis(10), m.lock()).await else {
//!     return Err(Error::Timeout);
//! };
//! ```
//!
//! Cancelling a pending `lock` has no side effects, so this is exact: either
//! you own the lock, or nothing happened.
//!
//! # Holding a guard across `await`
//!
//! The guard can be held across an `await`, and the managers in this crate
//! do so for the duration of a bus transaction. If the enclosing future is
//! dropped at that `await`, the guard is dropped too and the mutex unlocks.
//! Code that temporarily breaks an invariant of `T` must restore it before
//! awaiting, or use [`perform`][Mutex::perform], which can't await at all.

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::atomic::AtomicExt;
use crate::exec::Notify;

/// Holds a `T` that can be accessed from multiple concurrent futures/tasks, but
/// only one at a time.
pub struct Mutex<T: ?Sized> {
    /// `true` while some guard exists.
    locked: AtomicBool,
    /// Tasks that found the mutex locked.
    waiters: Notify,
    /// The contents of the mutex. Safe to access only when `locked` has been
    /// atomically flipped from false to true.
    value: UnsafeCell<T>,
}

// Safety: access to `value` is serialized by `locked`.
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates an unlocked mutex holding `contents`.
    pub const fn new(contents: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            waiters: Notify::new(),
            value: UnsafeCell::new(contents),
        }
    }

    /// Consumes the mutex and returns its contents.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Attempts to lock the mutex without waiting.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.locked
            .compare_exchange_polyfill(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| MutexGuard { mutex: self })
    }

    /// Locks the mutex, waiting as long as it takes.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    ///
    /// Dropping this future before it resolves leaves the mutex untouched.
    pub async fn lock(&self) -> MutexGuard<'_, T> {
        self.waiters.until_racy(|| self.try_lock()).await
    }

    /// Locks the mutex, applies `op` to its contents and unlocks.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    ///
    /// `op` runs synchronously once the lock is obtained, so cancellation
    /// can only happen before it starts.
    pub async fn perform<R>(&self, op: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock().await;
        op(&mut guard)
    }

    /// Like [`perform`][Mutex::perform], but gives up immediately if the
    /// mutex is locked.
    pub fn try_perform<R>(&self, op: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.try_lock().map(|mut guard| op(&mut guard))
    }

    /// Checks whether the mutex is currently locked. The answer may be out of
    /// date by the time you look at it.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl<T: ?Sized> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .field("waiters", &self.waiters)
            .finish_non_exhaustive()
    }
}

/// Proof that a [`Mutex`] is locked. Dropping the guard unlocks the mutex and
/// wakes any waiters.
#[must_use = "dropping the guard unlocks the mutex immediately"]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
        self.mutex.waiters.notify();
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // Safety: we hold the lock.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: we hold the lock, and `&mut self` keeps this unique.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T: ?Sized> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MutexGuard")
    }
}
