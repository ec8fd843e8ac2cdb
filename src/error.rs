// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Result codes shared by every manager.
//!
//! Success is represented by `Ok`. Each [`Error`] variant still has a stable
//! integer code (see [`Error::code`]) for applications that forward results
//! over a wire or into a log.

use core::fmt;

/// Integer code of a successful operation.
pub const SUCCESS: i32 = 0;

/// Reasons an operation can fail.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The hardware reported an error, or a transfer ended incomplete.
    Failure,
    /// A lock or completion was not obtained before the deadline.
    Timeout,
    /// The resource is in a state that forbids the request right now.
    Busy,
    /// An argument is out of range, or the manager has not been initialized.
    InvalidParameter,
    /// The resource is already taken, registered or initialized.
    NotAvailable,
    /// The operation exists but has no implementation on this part.
    NotImplemented,
    /// The operation does not apply to the current configuration.
    NotSupported,
}

/// Shorthand used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

impl Error {
    /// Integer code of this error. `0` is reserved for success.
    pub const fn code(self) -> i32 {
        match self {
            Self::Failure => 1,
            Self::Timeout => 2,
            Self::Busy => 3,
            Self::InvalidParameter => 4,
            Self::NotAvailable => 5,
            Self::NotImplemented => 6,
            Self::NotSupported => 7,
        }
    }

    /// Inverse of [`Error::code`]. Returns `None` for `0` and for codes this
    /// crate doesn't produce.
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Failure),
            2 => Some(Self::Timeout),
            3 => Some(Self::Busy),
            4 => Some(Self::InvalidParameter),
            5 => Some(Self::NotAvailable),
            6 => Some(Self::NotImplemented),
            7 => Some(Self::NotSupported),
            _ => None,
        }
    }
}

/// Collapses a `Result` into its integer code.
pub fn result_code<T, E: Into<Error>>(r: Result<T, E>) -> i32 {
    match r {
        Ok(_) => SUCCESS,
        Err(e) => e.into().code(),
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Failure => "operation failed",
            Self::Timeout => "timed out",
            Self::Busy => "resource busy",
            Self::InvalidParameter => "invalid parameter",
            Self::NotAvailable => "resource not available",
            Self::NotImplemented => "not implemented",
            Self::NotSupported => "not supported",
        };
        f.write_str(s)
    }
}

/// Status reported by a hardware backend when it refuses or fails a request.
///
/// These are the non-OK outcomes of a vendor HAL call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalError {
    /// Generic hardware error.
    Error,
    /// The peripheral is busy with another request.
    Busy,
    /// The hardware did not finish in time.
    Timeout,
}

impl From<HalError> for Error {
    fn from(e: HalError) -> Self {
        match e {
            HalError::Error => Error::Failure,
            HalError::Busy => Error::Busy,
            HalError::Timeout => Error::Timeout,
        }
    }
}

/// Error from a transfer that may have moved some bytes before failing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PartialTransfer {
    /// What went wrong.
    pub error: Error,
    /// How many bytes were transferred anyway.
    pub bytes: usize,
}

impl PartialTransfer {
    pub(crate) const fn none(error: Error) -> Self {
        Self { error, bytes: 0 }
    }
}

impl From<PartialTransfer> for Error {
    fn from(p: PartialTransfer) -> Self {
        p.error
    }
}

impl fmt::Display for PartialTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} after {} bytes", self.error, self.bytes)
    }
}
