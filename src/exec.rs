// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event signalling between interrupt handlers and tasks.
//!
//! The central type is [`Notify`], which lets any number of futures park
//! until "something happened" and lets an interrupt handler wake all of them
//! at once. Everything else in the crate that waits (mutexes, semaphores,
//! timers) is built on a `Notify` plus a condition that gets rechecked after
//! every wake.
//!
//! This module doesn't contain an executor. `Notify` stores ordinary
//! `core::task::Waker`s, so whatever runs your tasks is also what runs the
//! peripheral managers. For bring-up code, or for firmware without an
//! executor, [`spin_on`] polls a single future to completion.

use core::cell::RefCell;
use core::fmt;
use core::future::Future;
use core::mem;
use core::pin::{pin, Pin};
use core::task::{Context, Poll, Waker};

use critical_section::Mutex as CsMutex;
use heapless::Vec;
use pin_project::pin_project;

/// Number of distinct wakers a [`Notify`] remembers before it starts waking
/// early subscribers to make room.
pub const NOTIFY_SLOTS: usize = 8;

type WakerList = Vec<Waker, NOTIFY_SLOTS>;

/// A broadcast wake-up that interrupt handlers can trigger.
///
/// Futures [`subscribe`][Notify::subscribe] their `Waker`; a call to
/// [`notify`][Notify::notify] wakes every subscriber and ends their
/// subscriptions. Because wakes can be spurious, waiting code should use
/// [`until`][Notify::until] or [`until_racy`][Notify::until_racy], which
/// recheck a condition every time they're polled.
///
/// `notify` is safe to call from an ISR. A `Notify` is normally stored inside
/// a `static` driver object:
///
/// ```ignore
/// static RX_READY: Notify = Notify::new();
///
/// #[interrupt]
/// fn USART2() {
///     RX_FLAG.store(true, Ordering::Release);
///     RX_READY.notify();
/// }
///
/// async fn wait_rx() {
///     RX_READY.until_racy(|| RX_FLAG.swap(false, Ordering::Acquire)).await;
/// }
/// ```
///
/// # Capacity
///
/// Subscribers are kept in a fixed table of [`NOTIFY_SLOTS`] entries. A waker
/// that is already present (by `Waker::will_wake`) is not stored twice. If the
/// table is full, all stored wakers are woken and dropped before the new one
/// is recorded. Those tasks observe a spurious wake, recheck their condition
/// and subscribe again, so nobody is ever lost.
pub struct Notify {
    waiters: CsMutex<RefCell<WakerList>>,
}

impl Notify {
    /// Creates a new `Notify` with no tasks waiting.
    pub const fn new() -> Self {
        Self {
            waiters: CsMutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Adds the `Waker` to the set of waiters.
    ///
    /// This is a low-level operation. For using a `Notify` in practice, you
    /// probably want [`until`][Notify::until] instead.
    pub fn subscribe(&self, waker: &Waker) {
        let evicted = critical_section::with(|cs| {
            let mut list = self.waiters.borrow_ref_mut(cs);
            if list.iter().any(|w| w.will_wake(waker)) {
                return None;
            }
            match list.push(waker.clone()) {
                Ok(()) => None,
                Err(w) => {
                    let old = mem::take(&mut *list);
                    // Cannot fail, the list was just emptied.
                    let _ = list.push(w);
                    Some(old)
                }
            }
        });
        if let Some(old) = evicted {
            for w in old {
                w.wake();
            }
        }
    }

    /// Wakes every waker passed to `subscribe` since the last `notify`.
    ///
    /// The wakers are removed inside a critical section and woken outside it,
    /// so this is safe to call from any interrupt priority.
    pub fn notify(&self) {
        let list = critical_section::with(|cs| {
            mem::take(&mut *self.waiters.borrow_ref_mut(cs))
        });
        for w in list {
            w.wake();
        }
    }

    /// Number of wakers currently subscribed.
    pub fn waiting(&self) -> usize {
        critical_section::with(|cs| self.waiters.borrow_ref(cs).len())
    }

    /// Waits for a condition to become true, checking only when signaled by
    /// this `Notify`.
    ///
    /// The meaning of `cond` "passing" is defined by the [`TestResult`] trait:
    /// a `bool` passes when `true`, an `Option<T>` passes when `Some`, and the
    /// future then produces the contained value.
    ///
    /// Use this only if `cond` can't change between the check and the
    /// subscription, i.e. no interrupt handler affects it. Otherwise use
    /// [`until_racy`][Notify::until_racy].
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict, if no data is moved into `cond`.
    ///
    /// Dropping this future drops `cond` and may leave a stale subscription
    /// behind, costing one spurious wake later.
    pub fn until<F, T: TestResult>(&self, cond: F) -> Until<'_, F>
    where
        F: FnMut() -> T,
    {
        Until {
            cond,
            notify: self,
        }
    }

    /// Waits for a condition to become true, subscribing _before_ each check
    /// so that a preempting interrupt handler can't slip its `notify` in
    /// between the check and the subscription.
    ///
    /// If `cond` passes immediately, the subscription is left behind and may
    /// produce one spurious wake later. That costs a poll and nothing else.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict, if no data is moved into `cond`.
    pub fn until_racy<F, T: TestResult>(&self, cond: F) -> UntilRacy<'_, F>
    where
        F: FnMut() -> T,
    {
        UntilRacy {
            cond,
            notify: self,
        }
    }

    /// Subscribes and waits for the next wake, whatever its cause.
    ///
    /// # Cancellation
    ///
    /// **Cancel safety:** Strict.
    pub fn until_next(&self) -> impl Future<Output = ()> + '_ {
        let mut setup = false;
        self.until(move || mem::replace(&mut setup, true))
    }
}

impl Default for Notify {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Notify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notify")
            .field("waiting", &self.waiting())
            .finish()
    }
}

/// Trait implemented by things that indicate success or failure, to be used
/// with [`Notify::until`] and friends.
///
/// In practice this is `bool` (if there's no output associated with success) or
/// `Option<T>` (if there is).
pub trait TestResult {
    /// Type of content produced on success.
    type Output;
    /// Converts `self` into an `Option` that is `Some` on success, `None` on
    /// failure.
    fn into_test_result(self) -> Option<Self::Output>;
}

impl TestResult for bool {
    type Output = ();
    fn into_test_result(self) -> Option<Self::Output> {
        self.then_some(())
    }
}

impl<T> TestResult for Option<T> {
    type Output = T;
    fn into_test_result(self) -> Option<Self::Output> {
        self
    }
}

/// Future produced by [`Notify::until`].
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project]
pub struct Until<'n, F> {
    cond: F,
    notify: &'n Notify,
}

impl<F, T> Future for Until<'_, F>
    where F: FnMut() -> T,
          T: TestResult,
{
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let p = self.project();
        if let Some(x) = (p.cond)().into_test_result() {
            Poll::Ready(x)
        } else {
            p.notify.subscribe(cx.waker());
            Poll::Pending
        }
    }
}

/// Future produced by [`Notify::until_racy`].
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[pin_project]
pub struct UntilRacy<'n, F> {
    cond: F,
    notify: &'n Notify,
}

impl<F, T> Future for UntilRacy<'_, F>
    where F: FnMut() -> T,
          T: TestResult,
{
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let p = self.project();
        p.notify.subscribe(cx.waker());
        if let Some(x) = (p.cond)().into_test_result() {
            Poll::Ready(x)
        } else {
            Poll::Pending
        }
    }
}

/// Returns a future that is pending exactly once, waking itself so the
/// executor polls it again soon. Lets other tasks run in the middle of a long
/// computation.
///
/// # Cancellation
///
/// **Cancel safety:** Strict.
pub fn yield_cpu() -> impl Future<Output = ()> {
    let mut yielded = false;
    core::future::poll_fn(move |cx| {
        if mem::replace(&mut yielded, true) {
            Poll::Ready(())
        } else {
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
}

/// Drives `fut` to completion by polling it in a loop with a no-op waker.
///
/// This is the executor-less way to use the managers: every wait becomes a
/// busy-wait that rechecks its condition on each pass. Time still advances
/// because the SysTick handler keeps calling [`crate::time::tick`].
///
/// Don't call this from an interrupt handler, or from inside a future that
/// some other executor is polling.
pub fn spin_on<F: Future>(fut: F) -> F::Output {
    let mut fut = pin!(fut);
    let mut cx = Context::from_waker(futures::task::noop_waker_ref());
    loop {
        if let Poll::Ready(x) = fut.as_mut().poll(&mut cx) {
            return x;
        }
        core::hint::spin_loop();
    }
}
