// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-capacity byte ring buffer shared between an ISR and a task.
//!
//! A [`Fifo`] has one producer (usually a receive interrupt, or a DMA stream
//! plus the interrupt that publishes its position) and one consumer (a
//! task). Every operation takes an `in_isr` flag: from task context the
//! operation runs inside a critical section so a preempting producer can't
//! observe a half-updated pair of indices; from interrupt context it runs
//! bare.
//!
//! # Indices
//!
//! `write_index` and `read_index` count bytes, not slots. The slot for an
//! index is `index % N`, and the number of buffered bytes is simply
//! `write_index - read_index`, so "full" and "empty" are never confused.
//! Whenever [`Fifo::count`] finds the buffer not full it folds both indices
//! back toward zero by the same multiple of `N`, which keeps them bounded
//! without changing the count or the slot either one refers to.

use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::cheap_assert;

/// A ring buffer of `N` bytes.
pub struct Fifo<const N: usize> {
    storage: UnsafeCell<[u8; N]>,
    write_index: AtomicUsize,
    read_index: AtomicUsize,
}

// Safety: slots are only written by the single producer at `write_index`
// and only read by the single consumer at `read_index`, and both indices are
// updated inside a critical section unless the caller is already in one.
unsafe impl<const N: usize> Sync for Fifo<N> {}

impl<const N: usize> Fifo<N> {
    /// Creates an empty buffer.
    ///
    /// # Panics
    ///
    /// If `N` is zero. In a `static` this is a compile error.
    pub const fn new() -> Self {
        cheap_assert!(N > 0);
        Self {
            storage: UnsafeCell::new([0; N]),
            write_index: AtomicUsize::new(0),
            read_index: AtomicUsize::new(0),
        }
    }

    /// Number of bytes the buffer holds when full.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Zero-fills the storage and empties the buffer.
    ///
    /// Call only while no producer is running.
    pub fn init(&self) {
        critical_section::with(|_| {
            // Safety: producer is stopped and the consumer is us.
            unsafe { *self.storage.get() = [0; N] };
            self.reset_indices();
        })
    }

    /// Empties the buffer. Storage contents are left as they were.
    pub fn reset(&self) {
        critical_section::with(|_| self.reset_indices())
    }

    fn reset_indices(&self) {
        self.write_index.store(0, Ordering::Relaxed);
        self.read_index.store(0, Ordering::Relaxed);
    }

    /// Runs `body` with the indices protected against the other context.
    fn section<R>(&self, in_isr: bool, body: impl FnOnce() -> R) -> R {
        if in_isr {
            body()
        } else {
            critical_section::with(|_| body())
        }
    }

    /// Number of buffered bytes.
    pub fn count(&self, in_isr: bool) -> usize {
        self.section(in_isr, || self.count_inner())
    }

    fn count_inner(&self) -> usize {
        let wr = self.write_index.load(Ordering::Relaxed);
        let rd = self.read_index.load(Ordering::Relaxed);
        let count = wr.wrapping_sub(rd);
        if count < N {
            let fold = rd - rd % N;
            self.write_index.store(wr - fold, Ordering::Relaxed);
            self.read_index.store(rd - fold, Ordering::Relaxed);
        }
        count
    }

    /// Appends `byte`, returning the new count, or gives the byte back if
    /// the buffer is full. A full buffer is left unchanged.
    pub fn write(&self, byte: u8, in_isr: bool) -> Result<usize, u8> {
        self.section(in_isr, || {
            if self.count_inner() >= N {
                return Err(byte);
            }
            Ok(self.push_inner(byte))
        })
    }

    /// Appends `byte`, discarding the oldest unread byte if the buffer is
    /// full. Returns the new count.
    pub fn write_overwrite(&self, byte: u8, in_isr: bool) -> usize {
        self.section(in_isr, || {
            if self.count_inner() >= N {
                let rd = self.read_index.load(Ordering::Relaxed);
                self.read_index.store(rd + 1, Ordering::Relaxed);
            }
            self.push_inner(byte)
        })
    }

    fn push_inner(&self, byte: u8) -> usize {
        let wr = self.write_index.load(Ordering::Relaxed);
        // Safety: slot `wr % N` is not readable until write_index advances.
        unsafe { (*self.storage.get())[wr % N] = byte };
        self.write_index.store(wr + 1, Ordering::Release);
        self.count_inner()
    }

    /// Removes the oldest byte, returning it with the new count, or `None` if
    /// the buffer is empty. An empty buffer is left unchanged.
    pub fn read(&self, in_isr: bool) -> Option<(u8, usize)> {
        self.section(in_isr, || {
            if self.count_inner() == 0 {
                return None;
            }
            let rd = self.read_index.load(Ordering::Relaxed);
            // Safety: slot `rd % N` was published by an earlier write.
            let byte = unsafe { (*self.storage.get())[rd % N] };
            self.read_index.store(rd + 1, Ordering::Release);
            Some((byte, self.count_inner()))
        })
    }

    /// Moves bytes into `dst` until it is full or the buffer is empty.
    /// Returns the number of bytes copied.
    pub fn copy_out(&self, dst: &mut [u8], in_isr: bool) -> usize {
        let mut copied = 0;
        for slot in dst.iter_mut() {
            match self.read(in_isr) {
                Some((b, _)) => *slot = b,
                None => break,
            }
            copied += 1;
        }
        copied
    }

    /// Start of the storage array, for handing to a DMA stream that fills
    /// the buffer circularly.
    pub fn storage_ptr(&self) -> *mut u8 {
        self.storage.get().cast::<u8>()
    }

    /// Publishes data written behind our back by a circular DMA stream whose
    /// next write lands on slot `position`. Bytes beyond capacity overwrite
    /// the oldest unread data, as the DMA engine already did. Returns the new
    /// count.
    pub fn sync_write_position(&self, position: usize, in_isr: bool) -> usize {
        self.section(in_isr, || {
            let wr = self.write_index.load(Ordering::Relaxed);
            let delta = (position % N + N - wr % N) % N;
            let wr = wr + delta;
            self.write_index.store(wr, Ordering::Release);
            let rd = self.read_index.load(Ordering::Relaxed);
            if wr - rd > N {
                self.read_index.store(wr - N, Ordering::Relaxed);
            }
            self.count_inner()
        })
    }
}

impl<const N: usize> Default for Fifo<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> fmt::Debug for Fifo<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fifo")
            .field("capacity", &N)
            .field("count", &self.count(false))
            .finish()
    }
}
