// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Critical Section
//!
//! The lowest-level lock of the runtime: one 32-bit word arbitrated by the
//! kernel. Every other primitive is built from it.
//!
//! # Design
//!
//! - **Word**: `0` when free, otherwise the owner's thread handle, with
//!   [`HAS_LISTENERS`] set while other threads sleep in the kernel
//! - **Fast path**: uncontended acquire and release are a single CAS
//! - **Slow path**: a contender sets the listener bit and asks the kernel
//!   to park it until the owner hands the word over
//! - **Re-entry**: entering a section the caller already owns returns
//!   immediately and does not count; recursion is the caller's business
//!
//! # Usage
//!
//! ```rust,ignore
//! let counter = Guarded::new(0u32);
//! *counter.lock() += 1;
//! ```

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::err::kernel::TIMED_OUT;
use crate::os::condvar_impl::ConditionVariableImpl;
use crate::os::tls;
use crate::svc::{Handle, Svc, LOCK_HAS_LISTENERS};

/// Listener bit of the lock word
pub const HAS_LISTENERS: u32 = LOCK_HAS_LISTENERS;

/// Kernel-arbitrated mutual exclusion
#[derive(Debug, Default)]
pub struct CriticalSection {
    image: AtomicU32,
}

impl CriticalSection {
    pub const fn new() -> Self {
        Self { image: AtomicU32::new(0) }
    }

    /// Address of the lock word, the key the kernel arbitrates on
    pub(crate) fn address(&self) -> usize {
        &self.image as *const AtomicU32 as usize
    }

    /// Acquire the section, blocking while another thread owns it.
    pub fn enter(&self) {
        tls::with_current_thread(|thread| self.enter_as(thread.kernel(), thread.handle()));
    }

    fn enter_as(&self, kernel: &dyn Svc, current: Handle) {
        loop {
            let value = match self.image.compare_exchange(
                0,
                current.raw(),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(value) => value,
            };

            if value & !HAS_LISTENERS == current.raw() {
                return;
            }

            if value & HAS_LISTENERS != 0 {
                self.arbitrate(kernel, Handle::from_raw(value & !HAS_LISTENERS), current);
            } else if self
                .image
                .compare_exchange(value, value | HAS_LISTENERS, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                self.arbitrate(kernel, Handle::from_raw(value), current);
            }
        }
    }

    fn arbitrate(&self, kernel: &dyn Svc, owner: Handle, current: Handle) {
        // SAFETY: the lock word lives as long as `self`, which the caller
        // borrows for the whole call.
        let result = unsafe { kernel.arbitrate_lock(owner, self.address(), current) };
        match result {
            Ok(()) => {}
            Err(code) if code.matches(TIMED_OUT) => {}
            Err(code) => crate::rt_abort_result!(code, "arbitration on {:?} failed", owner),
        }
    }

    /// Acquire the section if nobody else holds it.
    pub fn try_enter(&self) -> bool {
        let current = tls::current_thread_handle().raw();
        match self.image.compare_exchange(0, current, Ordering::Acquire, Ordering::Relaxed) {
            Ok(_) => true,
            Err(value) => value & !HAS_LISTENERS == current,
        }
    }

    /// Release the section. Must be called by the owner.
    pub fn leave(&self) {
        tls::with_current_thread(|thread| {
            let current = thread.handle().raw();
            let Err(value) =
                self.image.compare_exchange(current, 0, Ordering::Release, Ordering::Relaxed)
            else {
                return;
            };

            crate::rt_assert!(
                value & !HAS_LISTENERS == current,
                "section left by {:#x} but owned by {:#x}",
                current,
                value & !HAS_LISTENERS
            );
            if value & HAS_LISTENERS != 0 {
                // SAFETY: as in `arbitrate`.
                crate::rt_abort_on_err!(unsafe { thread.kernel().arbitrate_unlock(self.address()) });
            }
        });
    }

    /// Whether the calling thread owns the section.
    ///
    /// A snapshot without synchronization; only the answer "yes" is stable.
    pub fn is_locked_by_current_thread(&self) -> bool {
        let current = tls::current_thread_handle().raw();
        self.image.load(Ordering::Relaxed) & !HAS_LISTENERS == current
    }

    /// Whether any thread owns the section
    pub fn is_locked(&self) -> bool {
        self.image.load(Ordering::Relaxed) != 0
    }
}

/// ============================================================================
/// Guarded Data
/// ============================================================================

/// Data only reachable while holding its critical section
///
/// The runtime's objects keep their mutable state in one of these. A guard
/// can also sleep on a condition variable, releasing the section for the
/// duration of the wait.
#[derive(Debug, Default)]
pub struct Guarded<T> {
    critical_section: CriticalSection,
    data: UnsafeCell<T>,
}

// SAFETY: the data is only handed out through a guard, and only one thread
// holds the guard's critical section at a time.
unsafe impl<T: Send> Send for Guarded<T> {}
unsafe impl<T: Send> Sync for Guarded<T> {}

impl<T> Guarded<T> {
    pub const fn new(data: T) -> Self {
        Self { critical_section: CriticalSection::new(), data: UnsafeCell::new(data) }
    }

    /// Acquire the section and borrow the data.
    ///
    /// Aborts if the calling thread already holds it: handing out a second
    /// guard would alias the data.
    pub fn lock(&self) -> GuardedRef<'_, T> {
        crate::rt_assert!(
            !self.critical_section.is_locked_by_current_thread(),
            "guarded section entered twice by the same thread"
        );
        self.critical_section.enter();
        GuardedRef { owner: self }
    }

    /// Get the data through exclusive access, no locking needed
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// Exclusive access to [`Guarded`] data; releases the section on drop
pub struct GuardedRef<'a, T> {
    owner: &'a Guarded<T>,
}

impl<T> GuardedRef<'_, T> {
    /// Sleep on `condition_variable` with the section released.
    ///
    /// The section is held again when this returns.
    pub fn wait(&mut self, condition_variable: &ConditionVariableImpl) {
        condition_variable.wait(&self.owner.critical_section);
    }

    /// Like [`GuardedRef::wait`], bounded by `timeout` nanoseconds.
    ///
    /// Returns `false` when the wait timed out.
    pub fn wait_timeout(&mut self, condition_variable: &ConditionVariableImpl, timeout: i64) -> bool {
        condition_variable.wait_timeout(&self.owner.critical_section, timeout)
    }
}

impl<T> Deref for GuardedRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the critical section.
        unsafe { &*self.owner.data.get() }
    }
}

impl<T> DerefMut for GuardedRef<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the critical section and is borrowed
        // mutably.
        unsafe { &mut *self.owner.data.get() }
    }
}

impl<T> Drop for GuardedRef<'_, T> {
    fn drop(&mut self) {
        self.owner.critical_section.leave();
    }
}
