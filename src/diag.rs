// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Runtime Diagnostics
//!
//! Programmer errors and unexpected kernel failures are not recoverable in
//! this runtime. They end in [`abort`], which reports what went wrong on
//! the log and on the kernel debug channel, then asks the kernel to break.
//!
//! # Usage
//!
//! ```rust,ignore
//! rt_assert!(stack_size % PAGE_SIZE == 0, "stack size {:#x} is not page aligned", stack_size);
//! let info = rt_abort_on_err!(kernel.query_memory(address));
//! ```

use alloc::string::String;
use core::fmt::{self, Write};
use core::panic::Location;

use crate::debug::log_error;
use crate::err::ResultCode;
use crate::os::tls;
use crate::svc::BreakReason;

/// Serialises concurrent aborts so their reports do not interleave.
///
/// A spinlock rather than a critical section: the abort may come from the
/// critical section itself.
static ABORT_LOCK: spin::Mutex<()> = spin::Mutex::new(());

const BANNER: &str = "!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!";

/// What went wrong, as captured by the abort macros
pub struct AbortInfo<'a> {
    condition: &'static str,
    module: &'static str,
    result: Option<ResultCode>,
    message: Option<fmt::Arguments<'a>>,
}

impl<'a> AbortInfo<'a> {
    pub const fn new(
        condition: &'static str,
        module: &'static str,
        result: Option<ResultCode>,
        message: Option<fmt::Arguments<'a>>,
    ) -> Self {
        Self { condition, module, result, message }
    }

    fn kind(&self) -> &'static str {
        match (self.result, self.message) {
            (Some(_), _) => "Runtime abort with result",
            (None, Some(_)) => "Runtime abort with custom message",
            (None, None) => "Runtime abort",
        }
    }

    fn write_report(&self, out: &mut String, location: &Location<'_>) -> fmt::Result {
        writeln!(out, "{}", BANNER)?;
        writeln!(out, "! {}", self.kind())?;
        if let Some(result) = self.result {
            writeln!(out, "! Result: {:#010x}", result.raw())?;
        }
        if let Some(message) = self.message {
            writeln!(out, "! Message: {}", message)?;
        }
        writeln!(out, "! Condition: {}", self.condition)?;
        writeln!(out, "! Module: {}", self.module)?;
        writeln!(out, "! File: {}", location.file())?;
        writeln!(out, "! Line: {}", location.line())?;
        writeln!(out, "{}", BANNER)
    }

    fn write_summary(&self, out: &mut String, location: &Location<'_>) -> fmt::Result {
        write!(out, "{} ({}:{})", self.condition, location.file(), location.line())?;
        if let Some(result) = self.result {
            write!(out, " result {}", result)?;
        }
        if let Some(message) = self.message {
            write!(out, ": {}", message)?;
        }
        Ok(())
    }
}

/// Report `info` and stop the process.
///
/// Without a thread context there is no kernel to report to, so the
/// summary goes to a Rust panic instead.
#[cold]
#[inline(never)]
#[track_caller]
pub fn abort(info: AbortInfo<'_>) -> ! {
    let location = Location::caller();

    let mut report = String::new();
    let mut summary = String::new();
    // Writing into a String cannot fail.
    let _ = info.write_report(&mut report, location);
    let _ = info.write_summary(&mut summary, location);

    let _serial = ABORT_LOCK.lock();
    for line in report.lines() {
        log_error!("{}", line);
    }

    match tls::current_thread() {
        Some(thread) => {
            let kernel = thread.kernel();
            let _ = kernel.output_debug_string(&report);
            kernel.break_execution(BreakReason::Panic, summary.as_bytes())
        }
        None => panic!("runtime abort without thread context: {}", summary),
    }
}

/// Write a formatted line to the kernel debug channel.
///
/// Does nothing on a thread the runtime does not know.
pub fn output(args: fmt::Arguments<'_>) {
    let Some(thread) = tls::current_thread() else {
        return;
    };
    let mut line = String::new();
    if line.write_fmt(args).is_err() {
        return;
    }
    line.push('\n');
    let _ = thread.kernel().output_debug_string(&line);
}

/// Abort unconditionally, optionally with a formatted message.
#[macro_export]
macro_rules! rt_abort {
    () => {
        $crate::diag::abort($crate::diag::AbortInfo::new("abort", module_path!(), None, None))
    };
    ($($arg:tt)+) => {
        $crate::diag::abort($crate::diag::AbortInfo::new(
            "abort",
            module_path!(),
            None,
            Some(::core::format_args!($($arg)+)),
        ))
    };
}

/// Abort with a kernel result attached.
#[macro_export]
macro_rules! rt_abort_result {
    ($code:expr $(,)?) => {
        $crate::diag::abort($crate::diag::AbortInfo::new(
            stringify!($code),
            module_path!(),
            Some($code),
            None,
        ))
    };
    ($code:expr, $($arg:tt)+) => {
        $crate::diag::abort($crate::diag::AbortInfo::new(
            stringify!($code),
            module_path!(),
            Some($code),
            Some(::core::format_args!($($arg)+)),
        ))
    };
}

/// Abort unless `cond` holds.
#[macro_export]
macro_rules! rt_assert {
    ($cond:expr $(,)?) => {
        if !($cond) {
            $crate::diag::abort($crate::diag::AbortInfo::new(
                stringify!($cond),
                module_path!(),
                None,
                None,
            ))
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            $crate::diag::abort($crate::diag::AbortInfo::new(
                stringify!($cond),
                module_path!(),
                None,
                Some(::core::format_args!($($arg)+)),
            ))
        }
    };
}

/// Unwrap a syscall result, aborting with the kernel result on failure.
#[macro_export]
macro_rules! rt_abort_on_err {
    ($result:expr $(,)?) => {
        match $result {
            Ok(value) => value,
            Err(code) => $crate::diag::abort($crate::diag::AbortInfo::new(
                stringify!($result),
                module_path!(),
                Some(code),
                None,
            )),
        }
    };
    ($result:expr, $($arg:tt)+) => {
        match $result {
            Ok(value) => value,
            Err(code) => $crate::diag::abort($crate::diag::AbortInfo::new(
                stringify!($result),
                module_path!(),
                Some(code),
                Some(::core::format_args!($($arg)+)),
            )),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::kernel;
    use crate::tests::Harness;

    #[test]
    fn test_report_layout() {
        let info = AbortInfo::new("ready", "rt::os", Some(kernel::TIMED_OUT), None);
        let mut report = String::new();
        info.write_report(&mut report, Location::caller()).unwrap();

        assert!(report.contains("! Runtime abort with result"));
        assert!(report.contains("! Result: 0x0000ea01"));
        assert!(report.contains("! Condition: ready"));
        assert!(report.contains("! Module: rt::os"));
        assert!(report.contains("diag.rs"));
    }

    #[test]
    fn test_abort_reports_to_debug_channel() {
        let harness = Harness::new();
        let kernel = harness.kernel.clone();

        let outcome = std::panic::catch_unwind(|| {
            crate::rt_assert!(1 + 1 == 3, "arithmetic is {}", "broken");
        });
        assert!(outcome.is_err());

        let output = kernel.debug_output();
        assert!(output.contains("! Runtime abort with custom message"));
        assert!(output.contains("! Message: arithmetic is broken"));
        assert!(output.contains("! Condition: 1 + 1 == 3"));
    }

    #[test]
    #[should_panic(expected = "result 0x0000fa01")]
    fn test_abort_on_err_carries_result() {
        let _harness = Harness::new();
        let failing: crate::err::SvcResult<u32> = Err(kernel::INVALID_STATE);
        let _ = crate::rt_abort_on_err!(failing);
    }

    #[test]
    fn test_output_writes_line() {
        let harness = Harness::new();
        output(format_args!("hello {}", 42));
        assert!(harness.kernel.debug_output().ends_with("hello 42\n"));
    }
}
