// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Atomic read-modify-write helpers that also work on ARMv6-M.
//!
//! Cortex-M0/M0+ parts have plain atomic loads and stores but no exclusive
//! access instructions, so `swap`, `compare_exchange` and friends don't exist
//! there. The traits here use the native operations when the build script
//! detects a target that has them (`cfg(periph_has_native_rmw)`), and
//! otherwise emulate them inside a `critical_section::with` block. Every
//! read-modify-write in the crate goes through these traits, so the managers
//! run unchanged on an STM32F0 companion part.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};

/// Read-modify-write operations common to all atomic types used here.
pub trait AtomicExt {
    /// Primitive type corresponding to this atomic type.
    type Value;

    /// Stores `val`, returning the previous contents. Replacement for `swap`.
    fn swap_polyfill(&self, val: Self::Value, ordering: Ordering) -> Self::Value;

    /// Replaces the contents with `new` if they equal `current`.
    ///
    /// Returns `Ok(current)` on success, `Err(actual_value)` on failure.
    /// Replacement for `compare_exchange`.
    fn compare_exchange_polyfill(
        &self,
        current: Self::Value,
        new: Self::Value,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self::Value, Self::Value>;
}

/// Atomic operations that apply to arithmetic types.
pub trait AtomicArithExt: AtomicExt {
    /// Adds `val` (wrapping), returning the original value.
    fn fetch_add_polyfill(&self, val: Self::Value, ordering: Ordering) -> Self::Value;
    /// Subtracts `val` (wrapping), returning the original value.
    fn fetch_sub_polyfill(&self, val: Self::Value, ordering: Ordering) -> Self::Value;
    /// Stores the larger of the current contents and `val`, returning the
    /// original value.
    fn fetch_max_polyfill(&self, val: Self::Value, ordering: Ordering) -> Self::Value;
}

macro_rules! impl_atomic_polyfills {
    ($t:ty, $v:ty) => {
        #[cfg(periph_has_native_rmw)]
        impl AtomicExt for $t {
            type Value = $v;

            #[inline(always)]
            fn swap_polyfill(&self, val: $v, ordering: Ordering) -> $v {
                self.swap(val, ordering)
            }

            #[inline(always)]
            fn compare_exchange_polyfill(
                &self,
                current: $v,
                new: $v,
                success: Ordering,
                failure: Ordering,
            ) -> Result<$v, $v> {
                self.compare_exchange(current, new, success, failure)
            }
        }

        #[cfg(not(periph_has_native_rmw))]
        impl AtomicExt for $t {
            type Value = $v;

            #[inline(always)]
            fn swap_polyfill(&self, val: $v, ordering: Ordering) -> $v {
                let (lo, so) = rmw_ordering(ordering);
                critical_section::with(|_| {
                    let x = self.load(lo);
                    self.store(val, so);
                    x
                })
            }

            fn compare_exchange_polyfill(
                &self,
                current: $v,
                new: $v,
                success: Ordering,
                failure: Ordering,
            ) -> Result<$v, $v> {
                let (lo, so) = rmw_ordering(success);
                critical_section::with(|_| {
                    let x = self.load(lo);
                    if x == current {
                        self.store(new, so);
                        Ok(x)
                    } else {
                        self.store(x, failure);
                        Err(x)
                    }
                })
            }
        }
    };
}

impl_atomic_polyfills!(AtomicBool, bool);
impl_atomic_polyfills!(AtomicU8, u8);
impl_atomic_polyfills!(AtomicU32, u32);
impl_atomic_polyfills!(AtomicUsize, usize);

macro_rules! impl_atomic_arith_polyfills {
    ($t:ty, $v:ty) => {
        #[cfg(periph_has_native_rmw)]
        impl AtomicArithExt for $t {
            #[inline(always)]
            fn fetch_add_polyfill(&self, val: $v, ordering: Ordering) -> $v {
                self.fetch_add(val, ordering)
            }

            #[inline(always)]
            fn fetch_sub_polyfill(&self, val: $v, ordering: Ordering) -> $v {
                self.fetch_sub(val, ordering)
            }

            #[inline(always)]
            fn fetch_max_polyfill(&self, val: $v, ordering: Ordering) -> $v {
                self.fetch_max(val, ordering)
            }
        }

        #[cfg(not(periph_has_native_rmw))]
        impl AtomicArithExt for $t {
            fn fetch_add_polyfill(&self, val: $v, ordering: Ordering) -> $v {
                let (lo, so) = rmw_ordering(ordering);
                critical_section::with(|_| {
                    let x = self.load(lo);
                    self.store(x.wrapping_add(val), so);
                    x
                })
            }

            fn fetch_sub_polyfill(&self, val: $v, ordering: Ordering) -> $v {
                let (lo, so) = rmw_ordering(ordering);
                critical_section::with(|_| {
                    let x = self.load(lo);
                    self.store(x.wrapping_sub(val), so);
                    x
                })
            }

            fn fetch_max_polyfill(&self, val: $v, ordering: Ordering) -> $v {
                let (lo, so) = rmw_ordering(ordering);
                critical_section::with(|_| {
                    let x = self.load(lo);
                    self.store(x.max(val), so);
                    x
                })
            }
        }
    };
}

impl_atomic_arith_polyfills!(AtomicU32, u32);
impl_atomic_arith_polyfills!(AtomicUsize, usize);

#[cfg(not(periph_has_native_rmw))]
#[inline(always)]
fn rmw_ordering(o: Ordering) -> (Ordering, Ordering) {
    match o {
        Ordering::AcqRel => (Ordering::Acquire, Ordering::Release),
        Ordering::Relaxed => (o, o),
        Ordering::SeqCst => (o, o),
        Ordering::Acquire => (Ordering::Acquire, Ordering::Relaxed),
        Ordering::Release => (Ordering::Relaxed, Ordering::Release),
        _ => panic!(),
    }
}
