// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Runtime Logging
//!
//! Thin level macros over the `log` facade. With the `log` feature
//! disabled the macros still type-check their arguments but emit nothing,
//! so call sites never need their own `cfg`.
//!
//! # Usage
//!
//! ```rust,ignore
//! log_debug!("thread {:#x} started", handle.raw());
//! log_warn!("stack allocator wrapped around at {:#x}", address);
//! ```

macro_rules! log_emit {
    ($level:ident, $($arg:tt)*) => {{
        #[cfg(feature = "log")]
        {
            ::log::$level!(target: "rt", $($arg)*);
        }
        #[cfg(not(feature = "log"))]
        {
            let _ = ::core::format_args!($($arg)*);
        }
    }};
}

macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::debug::log_emit!(trace, $($arg)*)
    };
}

macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::debug::log_emit!(debug, $($arg)*)
    };
}

macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::debug::log_emit!(info, $($arg)*)
    };
}

macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::debug::log_emit!(warn, $($arg)*)
    };
}

macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::debug::log_emit!(error, $($arg)*)
    };
}

pub(crate) use {log_debug, log_emit, log_error, log_info, log_trace, log_warn};
