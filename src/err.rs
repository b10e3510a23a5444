// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Result Codes and Runtime Errors
//!
//! Every kernel call answers with a single 32-bit result word where `0`
//! means success. A failure packs a module number (low 9 bits) and a
//! description (next 13 bits); callers compare the low 22 bits against the
//! known constants below to tell transient conditions from fatal ones.
//!
//! # Design
//!
//! - **ResultCode**: opaque kernel word, compared, never reinterpreted
//! - **SvcResult**: what every syscall returns
//! - **Error**: what runtime operations surface to applications
//!
//! Only resource exhaustion is ever surfaced through [`Error`]. Everything
//! else is either retried internally or escalated to an abort.

use core::fmt;

/// Bits of a result word that carry module and description.
pub const RESULT_MASK: u32 = 0x3F_FFFF;

/// Bits of a result word that carry the description only.
pub const DESCRIPTION_MASK: u32 = 0x3F_FE00;

const MODULE_BITS: u32 = 9;
const DESCRIPTION_BITS: u32 = 13;

/// Module number of kernel results.
pub const MODULE_KERNEL: u32 = 1;

/// Module number of results produced by this runtime.
pub const MODULE_RUNTIME: u32 = 3;

/// A raw kernel result word
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(u32);

impl ResultCode {
    /// The success value
    pub const SUCCESS: Self = Self(0);

    /// Compose a result from module and description
    pub const fn new(module: u32, description: u32) -> Self {
        Self(
            (module & ((1 << MODULE_BITS) - 1))
                | ((description & ((1 << DESCRIPTION_BITS) - 1)) << MODULE_BITS),
        )
    }

    /// Wrap a raw result word
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw result word
    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn module(self) -> u32 {
        self.0 & ((1 << MODULE_BITS) - 1)
    }

    pub const fn description(self) -> u32 {
        (self.0 >> MODULE_BITS) & ((1 << DESCRIPTION_BITS) - 1)
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    pub const fn is_failure(self) -> bool {
        self.0 != 0
    }

    /// Compare module and description, ignoring any upper bits
    pub const fn matches(self, other: Self) -> bool {
        (self.0 & RESULT_MASK) == (other.0 & RESULT_MASK)
    }

    /// Compare the description only, whatever module raised it
    pub const fn same_description(self, other: Self) -> bool {
        (self.0 & DESCRIPTION_MASK) == (other.0 & DESCRIPTION_MASK)
    }

    /// Turn a raw word into an `SvcResult`
    pub const fn into_result(self) -> SvcResult {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ResultCode({:#010x}, module={}, description={})",
            self.0,
            self.module(),
            self.description()
        )
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x} ({}-{})", self.0, 2000 + self.module(), self.description())
    }
}

/// Result type of every syscall
pub type SvcResult<T = ()> = core::result::Result<T, ResultCode>;

/// ============================================================================
/// Kernel Results
/// ============================================================================

/// Known kernel result values.
///
/// These are ABI constants of the kernel; the runtime only ever compares
/// against them.
pub mod kernel {
    use super::{ResultCode, MODULE_KERNEL};

    pub const INVALID_SIZE: ResultCode = ResultCode::new(MODULE_KERNEL, 101);
    pub const INVALID_ADDRESS: ResultCode = ResultCode::new(MODULE_KERNEL, 102);

    /// Out of kernel objects (notably thread slots)
    pub const OUT_OF_RESOURCE: ResultCode = ResultCode::new(MODULE_KERNEL, 103);

    pub const INVALID_CURRENT_MEMORY: ResultCode = ResultCode::new(MODULE_KERNEL, 106);
    pub const INVALID_MEMORY_REGION: ResultCode = ResultCode::new(MODULE_KERNEL, 110);
    pub const INVALID_PRIORITY: ResultCode = ResultCode::new(MODULE_KERNEL, 112);
    pub const INVALID_CORE_ID: ResultCode = ResultCode::new(MODULE_KERNEL, 113);
    pub const INVALID_HANDLE: ResultCode = ResultCode::new(MODULE_KERNEL, 114);

    /// A bounded wait expired
    pub const TIMED_OUT: ResultCode = ResultCode::new(MODULE_KERNEL, 117);

    /// A wait was interrupted before any handle signaled
    pub const CANCELLED: ResultCode = ResultCode::new(MODULE_KERNEL, 118);

    pub const OUT_OF_RANGE: ResultCode = ResultCode::new(MODULE_KERNEL, 119);
    pub const INVALID_ENUM_VALUE: ResultCode = ResultCode::new(MODULE_KERNEL, 120);

    /// The object is not in the state the call requires (e.g. resetting a
    /// clear event)
    pub const INVALID_STATE: ResultCode = ResultCode::new(MODULE_KERNEL, 125);
}

/// ============================================================================
/// Runtime Errors
/// ============================================================================

/// Result type for runtime operations
pub type Result<T = ()> = core::result::Result<T, Error>;

/// Errors surfaced to callers of the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No kernel thread slot or no address space left after retrying
    OutOfResource,

    /// A kernel call failed and the runtime hands the decision to the caller
    Kernel(ResultCode),
}

impl Error {
    /// Result word reported for [`Error::OutOfResource`]
    pub const OUT_OF_RESOURCE_CODE: ResultCode = ResultCode::new(MODULE_RUNTIME, 9);

    /// Get the result word for this error
    pub const fn code(self) -> ResultCode {
        match self {
            Error::OutOfResource => Self::OUT_OF_RESOURCE_CODE,
            Error::Kernel(code) => code,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfResource => write!(f, "out of resource ({})", self.code()),
            Error::Kernel(code) => write!(f, "kernel error {}", code),
        }
    }
}

impl From<ResultCode> for Error {
    fn from(code: ResultCode) -> Self {
        Error::Kernel(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_layout() {
        assert_eq!(kernel::TIMED_OUT.raw(), 0xEA01);
        assert_eq!(kernel::CANCELLED.raw(), 0xEC01);
        assert_eq!(kernel::INVALID_STATE.raw(), 0xFA01);
        assert_eq!(kernel::OUT_OF_RESOURCE.raw(), 0xCE01);

        let code = ResultCode::from_raw(0xEA01);
        assert_eq!(code.module(), 1);
        assert_eq!(code.description(), 117);
        assert!(code.is_failure());
        assert!(ResultCode::SUCCESS.is_success());
    }

    #[test]
    fn test_matching_ignores_upper_bits() {
        let noisy = ResultCode::from_raw(0xFFC0_EA01);
        assert!(noisy.matches(kernel::TIMED_OUT));
        assert!(!noisy.matches(kernel::CANCELLED));

        // Thread slot exhaustion is recognised whatever module reports it.
        let foreign = ResultCode::new(7, 103);
        assert!(!foreign.matches(kernel::OUT_OF_RESOURCE));
        assert!(foreign.same_description(kernel::OUT_OF_RESOURCE));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(ResultCode::SUCCESS.into_result(), Ok(()));
        assert_eq!(kernel::INVALID_HANDLE.into_result(), Err(kernel::INVALID_HANDLE));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::OutOfResource.code().raw(), 0x1203);
        let error = Error::from(kernel::INVALID_HANDLE);
        assert_eq!(error, Error::Kernel(kernel::INVALID_HANDLE));
        assert_eq!(error.code(), kernel::INVALID_HANDLE);
    }
}
