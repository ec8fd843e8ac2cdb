// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transfer modes and the status word an ISR hands back to a waiting task.

use core::sync::atomic::{AtomicU8, Ordering};

/// How a controller moves data.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum XferMode {
    /// The calling task drives the transfer byte by byte, blocking.
    Polling,
    /// The hardware raises an interrupt per byte (or per FIFO threshold).
    #[default]
    Interrupt,
    /// A DMA stream moves the data.
    Dma,
}

/// Outcome of an in-flight transfer, as last reported by its ISR.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferStatus {
    /// Started; nothing reported yet.
    Wait,
    /// The completion interrupt fired.
    Done,
    /// The error interrupt fired.
    Error,
}

impl TransferStatus {
    const fn into_raw(self) -> u8 {
        match self {
            Self::Wait => 0,
            Self::Done => 1,
            Self::Error => 2,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Wait,
            1 => Self::Done,
            _ => Self::Error,
        }
    }
}

/// A [`TransferStatus`] shared between a task and an ISR.
///
/// The ISR stores the status *before* giving the completion semaphore, and
/// the task loads it *after* taking the semaphore, so the release/acquire pair
/// makes the status visible to the task.
pub struct StatusCell(AtomicU8);

impl StatusCell {
    /// Creates a cell reading `Done` (idle).
    pub const fn new() -> Self {
        Self(AtomicU8::new(1))
    }

    /// Records `status`.
    pub fn set(&self, status: TransferStatus) {
        self.0.store(status.into_raw(), Ordering::Release);
    }

    /// Reads the last recorded status.
    pub fn get(&self) -> TransferStatus {
        TransferStatus::from_raw(self.0.load(Ordering::Acquire))
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for StatusCell {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("StatusCell").field(&self.get()).finish()
    }
}
