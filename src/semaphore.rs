// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary semaphore for handing completion events from interrupt handlers to
//! tasks.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::atomic::AtomicExt;
use crate::exec::Notify;

/// A binary semaphore.
///
/// A `Semaphore` holds at most one token. [`give`][Semaphore::give] deposits
/// it (a second `give` before anybody takes is absorbed), and
/// [`take`][Semaphore::take] waits until it's there and removes it.
///
/// `give` only touches an atomic flag and a [`Notify`], so it is the
/// operation interrupt handlers use to say "your transfer is done". Since a
/// token can outlive the wait it was meant for (a transfer that times out and
/// then completes anyway), callers that start a new operation should
/// [`drain`][Semaphore::drain] first.
pub struct Semaphore {
    given: AtomicBool,
    waiters: Notify,
}

impl Semaphore {
    /// Creates a semaphore with no token.
    pub const fn new() -> Self {
        Self {
            given: AtomicBool::new(false),
            waiters: Notify::new(),
        }
    }

    /// Deposits the token and wakes waiters. Safe to call from an ISR.
    pub fn give(&self) {
        self.given.store(true, Ordering::Release);
        self.waiters.notify();
    }

    /// Removes the token if it's present.
    pub fn try_take(&self) -> bool {
        self.given.swap_polyfill(false, Ordering::Acquire)
    }

    /// Waits for the token and removes it.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    ///
    /// The token is only removed in the poll that resolves the future, so
    /// dropping a pending `take` never loses a `give`.
    pub async fn take(&self) {
        self.waiters.until_racy(|| self.try_take()).await
    }

    /// Discards a token left over from an earlier operation.
    pub fn drain(&self) {
        self.given.store(false, Ordering::Relaxed);
    }

    /// Checks whether the token is present without taking it.
    pub fn is_given(&self) -> bool {
        self.given.load(Ordering::Acquire)
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("given", &self.is_given())
            .finish_non_exhaustive()
    }
}
