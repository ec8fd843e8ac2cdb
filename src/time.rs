// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Millisecond timekeeping and timeouts.
//!
//! The crate keeps a monotonic 64-bit count of milliseconds ("ticks") that
//! advances each time [`tick`] is called. On hardware that's the SysTick
//! handler's job: either enable the `systick` feature, which provides the
//! handler and [`initialize_sys_tick`], or call `tick` from a 1 kHz timer
//! interrupt of your own.
//!
//! # Types for describing time
//!
//! [`TickTime`] is a point in time, measured in ticks since boot. It's 64
//! bits wide, so it won't overflow in the lifetime of the product and we can
//! ignore wraparound everywhere.
//!
//! [`Millis`] is a relative interval. It has the same representation as
//! `TickTime`, so deadline arithmetic is a single add.
//!
//! # Imposing a timeout on an operation
//!
//! Every bounded wait in the peripheral managers is written as
//! [`with_timeout`] around an unbounded wait. The wrapped future is dropped
//! (cancelled) if it hasn't resolved by the deadline, and the result becomes
//! `None`.

use core::future::Future;
use core::ops::Add;
use core::pin::Pin;
use core::sync::atomic::{AtomicU32, Ordering};
use core::task::{Context, Poll};

use pin_project::pin_project;

use crate::atomic::AtomicArithExt;
use crate::exec::Notify;

/// Bottom 32 bits of the tick counter. Updated by ISR.
static TICK: AtomicU32 = AtomicU32::new(0);
/// Top 32 bits of the tick counter. Updated by ISR.
static EPOCH: AtomicU32 = AtomicU32::new(0);
/// Signalled on every tick, waking anything sleeping on a deadline.
static TIMER: Notify = Notify::new();

/// Advances the clock by one millisecond and wakes sleepers whose deadline
/// may have arrived. Safe to call from an ISR.
pub fn tick() {
    if TICK.fetch_add_polyfill(1, Ordering::Release) == u32::MAX {
        EPOCH.fetch_add_polyfill(1, Ordering::Release);
    }
    TIMER.notify();
}

/// Sets up the SysTick timer for 1kHz operation, assuming a CPU core clock of
/// `clock_hz`.
#[cfg(feature = "systick")]
pub fn initialize_sys_tick(syst: &mut cortex_m::peripheral::SYST, clock_hz: u32) {
    use cortex_m::peripheral::syst::SystClkSource;

    let cycles_per_millisecond = clock_hz / 1000;
    syst.set_reload(cycles_per_millisecond - 1);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_interrupt();
    syst.enable_counter();
}

/// System tick ISR.
#[cfg(feature = "systick")]
#[doc(hidden)]
#[cortex_m_rt::exception]
fn SysTick() {
    tick();
}

/// Represents a moment in time by the value of the system tick counter.
/// System-specific analog of `std::time::Instant`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickTime(u64);

impl TickTime {
    /// Retrieves the current value of the tick counter.
    pub fn now() -> Self {
        // Repeats only if we raced a tick that carried into EPOCH.
        loop {
            let e = EPOCH.load(Ordering::SeqCst);
            let t = TICK.load(Ordering::SeqCst);
            let e2 = EPOCH.load(Ordering::SeqCst);
            if e == e2 {
                break TickTime(((e as u64) << 32) | (t as u64));
            }
        }
    }

    /// Constructs a `TickTime` value describing a certain number of
    /// milliseconds since boot.
    pub const fn from_millis_since_boot(m: u64) -> Self {
        Self(m)
    }

    /// Time between `earlier` and `self`, or zero if `earlier` is actually
    /// later.
    pub fn millis_since(self, earlier: TickTime) -> Millis {
        Millis(self.0.saturating_sub(earlier.0))
    }
}

/// A period of time measured in milliseconds.
///
/// Timeouts throughout the crate are given as `Millis`. Unlike `Duration`,
/// adding one to a [`TickTime`] needs no 64-bit multiply or divide, which
/// matters on parts without hardware division.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Millis(pub u64);

impl Add<Millis> for TickTime {
    type Output = Self;
    fn add(self, other: Millis) -> Self::Output {
        TickTime(self.0 + other.0)
    }
}

/// Sleeps until the system time is equal to or greater than `deadline`.
///
/// If `deadline` is already in the past, this resolves on first poll.
///
/// # Cancellation
///
/// **Cancel safety:** Strict.
///
/// Dropping this future does nothing in particular.
pub async fn sleep_until(deadline: TickTime) {
    TIMER.until_racy(|| TickTime::now() >= deadline).await
}

/// Bounds `code` by `deadline`, resolving to `None` if the deadline passes
/// first.
///
/// `code` is always polled before the clock is checked, so work that can
/// finish without waiting (taking a free mutex, reading buffered bytes)
/// succeeds even when `deadline` has already passed. A zero timeout
/// therefore means "don't wait", not "fail".
///
/// The wrapped future is dropped when the combined future is dropped.
pub fn with_deadline<F>(deadline: TickTime, code: F) -> impl Future<Output = Option<F::Output>>
    where F: Future,
{
    Bounded {
        work: code,
        expiry: sleep_until(deadline),
    }
}

/// [`with_deadline`] with a deadline of `TickTime::now() + timeout`,
/// captured when `with_timeout` is called.
pub fn with_timeout<F>(timeout: Millis, code: F) -> impl Future<Output = Option<F::Output>>
    where F: Future,
{
    with_deadline(TickTime::now() + timeout, code)
}

#[derive(Debug)]
#[pin_project]
struct Bounded<W, E> {
    #[pin]
    work: W,
    #[pin]
    expiry: E,
}

impl<W, E> Future for Bounded<W, E>
    where W: Future,
          E: Future<Output = ()>,
{
    type Output = Option<W::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let p = self.project();
        if let Poll::Ready(x) = p.work.poll(cx) {
            return Poll::Ready(Some(x));
        }
        p.expiry.poll(cx).map(|()| None)
    }
}
