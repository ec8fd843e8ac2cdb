// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Async peripheral managers for STM32F4 microcontrollers.
//!
//! This crate sits between application tasks and the vendor HAL. It owns the
//! *sharing* problems that the HAL leaves to you: which pins are claimed and
//! by whom, when a GPIO port clock can be gated off, which SPI device is
//! talking on a shared controller, where UART bytes go while no task is
//! reading, and which callback runs when the RTC fires.
//!
//! # Layers
//!
//! - [`fifo`] is the byte ring buffer shared between interrupt handlers and
//!   tasks.
//! - [`gpio`], [`spi`], [`uart`] and [`rtc`] are the managers. Each is
//!   generic over a small hardware trait ([`gpio::GpioHw`], [`spi::SpiHw`],
//!   [`uart::UartHw`], [`rtc::RtcHw`]) that performs the actual register
//!   work, so the managers can be exercised on a host.
//! - [`mutex`], [`semaphore`], [`exec`] and [`time`] are the synchronization
//!   primitives the managers are built from. They use ordinary
//!   `core::task::Waker`s, so any executor can drive them.
//!
//! # Interrupts
//!
//! Managers never install interrupt handlers themselves. Your interrupt
//! handlers forward to the managers' `on_*` entry points, for instance:
//!
//! ```ignore
//! #[interrupt]
//! fn SPI1() {
//!     if spi1_transfer_finished() {
//!         SPI.on_complete(SpiId::Spi1);
//!     }
//! }
//! ```
//!
//! Entry points only touch atomics, critical sections and semaphores, so they
//! are safe to call from any interrupt priority.
//!
//! # Cancellation
//!
//! Every manager operation is a `Future`, which means it can be dropped while
//! pending (for example by [`time::with_timeout`]). The managers take care
//! that this is harmless: an interrupted SPI or UART transfer is aborted in
//! hardware before the caller's buffers are released, chip-select lines are
//! returned high, and locks are released.

#![no_std]

#![warn(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    missing_debug_implementations,
    missing_docs,
    semicolon_in_expressions_from_macros,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_op_in_unsafe_fn,
    unused_qualifications,
)]

#[cfg(test)]
extern crate std;

/// Internal assert macro that doesn't stringify its expression or generate any
/// fancy messages. This means failures must be diagnosed by file:line only, so,
/// don't use this more than once on the same line. In exchange, this makes
/// asserts significantly smaller in terms of text size.
macro_rules! cheap_assert {
    ($x:expr) => {
        if !$x { panic!(); };
    }
}
pub(crate) use cheap_assert;

#[macro_use]
mod log;

pub mod atomic;
pub mod error;
pub mod exec;
pub mod mutex;
pub mod semaphore;
pub mod time;
pub mod xfer;

pub mod fifo;
pub mod gpio;
pub mod rtc;
pub mod spi;
pub mod uart;

pub use error::{Error, Result};
