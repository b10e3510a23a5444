// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Condition Variable (kernel wait queue)
//!
//! The word inside [`ConditionVariableImpl`] is never read: its address is
//! the key of a kernel wait queue. Waiting hands a held
//! [`CriticalSection`] to the kernel, which releases it and parks the
//! thread on the key in one step, so a signal sent after the waiter
//! released the lock cannot be missed.
//!
//! # Design
//!
//! - **Success**: the kernel re-acquires the section before the wait
//!   returns
//! - **Timeout**: the kernel gives up without the section; the waiter
//!   enters it again itself before returning
//! - **Signal/Broadcast**: wake one or all sleepers of the key; nobody
//!   waiting is not an error

use core::sync::atomic::AtomicU32;

use crate::err::kernel::TIMED_OUT;
use crate::os::critical_section::CriticalSection;
use crate::os::tls;
use crate::svc::WAIT_FOREVER;

/// Wait-queue key used together with a [`CriticalSection`]
#[derive(Debug, Default)]
pub struct ConditionVariableImpl {
    image: AtomicU32,
}

impl ConditionVariableImpl {
    pub const fn new() -> Self {
        Self { image: AtomicU32::new(0) }
    }

    fn key(&self) -> usize {
        &self.image as *const AtomicU32 as usize
    }

    /// Wake one waiter.
    pub fn signal(&self) {
        tls::with_current_thread(|thread| thread.kernel().signal_process_wide_key(self.key(), 1));
    }

    /// Wake every waiter.
    pub fn broadcast(&self) {
        tls::with_current_thread(|thread| thread.kernel().signal_process_wide_key(self.key(), -1));
    }

    /// Release `critical_section`, sleep until signaled, and hold it again.
    ///
    /// The caller must own `critical_section`.
    pub fn wait(&self, critical_section: &CriticalSection) {
        tls::with_current_thread(|thread| {
            // SAFETY: the caller owns the section and keeps it borrowed
            // until the kernel returns.
            let result = unsafe {
                thread.kernel().wait_process_wide_key_atomic(
                    critical_section.address(),
                    self.key(),
                    thread.handle(),
                    WAIT_FOREVER,
                )
            };
            crate::rt_abort_on_err!(result);
        });
    }

    /// Like [`ConditionVariableImpl::wait`] but gives up after `timeout`
    /// nanoseconds.
    ///
    /// Returns `false` on timeout. The section is held on return either way.
    pub fn wait_timeout(&self, critical_section: &CriticalSection, timeout: i64) -> bool {
        let result = tls::with_current_thread(|thread| {
            // SAFETY: as in `wait`.
            unsafe {
                thread.kernel().wait_process_wide_key_atomic(
                    critical_section.address(),
                    self.key(),
                    thread.handle(),
                    timeout,
                )
            }
        });

        match result {
            Ok(()) => true,
            Err(code) if code.matches(TIMED_OUT) => {
                critical_section.enter();
                false
            }
            Err(code) => crate::rt_abort_result!(code),
        }
    }
}
