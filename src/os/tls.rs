// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread-Local Storage
//!
//! Every kernel thread the runtime knows about carries a pointer to its
//! [`ThreadContext`]. The locks need it to learn the caller's handle; the
//! thread API needs it to answer "which thread am I".
//!
//! # Design
//!
//! - **aarch64**: the kernel hands each thread a [`ThreadLocalStorage`]
//!   block addressed by `TPIDRRO_EL0`; the context pointer lives right after
//!   the IPC command buffer
//! - **host**: a Rust thread-local slot holds the context
//!
//! Either way the slot owns one strong reference to the context.

use alloc::sync::Arc;

use crate::os::thread::ThreadContext;
use crate::svc::Handle;

/// Size of the IPC command buffer at the start of the TLS block.
pub const COMMAND_BUFFER_SIZE: usize = 0x100;

/// Layout of the kernel-provided per-thread block
#[repr(C)]
pub struct ThreadLocalStorage {
    pub command_buffer: [u8; COMMAND_BUFFER_SIZE],
    pub context: *const ThreadContext,
}

#[cfg(feature = "host")]
mod backend {
    use super::*;
    use core::cell::RefCell;

    std::thread_local! {
        static CONTEXT: RefCell<Option<Arc<ThreadContext>>> = const { RefCell::new(None) };
    }

    pub(super) fn replace(context: Option<Arc<ThreadContext>>) -> Option<Arc<ThreadContext>> {
        CONTEXT.with(|slot| slot.replace(context))
    }

    pub(super) fn current() -> Option<Arc<ThreadContext>> {
        CONTEXT.with(|slot| slot.borrow().clone())
    }

    pub(super) fn with<R>(f: impl FnOnce(Option<&ThreadContext>) -> R) -> R {
        CONTEXT.with(|slot| f(slot.borrow().as_deref()))
    }
}

#[cfg(all(not(feature = "host"), target_arch = "aarch64"))]
mod backend {
    use super::*;
    use aarch64_cpu::registers::{Readable, TPIDRRO_EL0};
    use core::ptr;

    fn storage() -> *mut ThreadLocalStorage {
        TPIDRRO_EL0.get() as *mut ThreadLocalStorage
    }

    pub(super) fn replace(context: Option<Arc<ThreadContext>>) -> Option<Arc<ThreadContext>> {
        let raw = context.map_or(ptr::null(), Arc::into_raw);
        // SAFETY: the kernel maps the TLS block for the lifetime of the
        // thread and only this thread writes its context slot.
        let previous = unsafe { ptr::replace(ptr::addr_of_mut!((*storage()).context), raw) };
        if previous.is_null() {
            None
        } else {
            // SAFETY: the slot held the reference produced by `into_raw`.
            Some(unsafe { Arc::from_raw(previous) })
        }
    }

    pub(super) fn current() -> Option<Arc<ThreadContext>> {
        // SAFETY: see `replace`.
        let raw = unsafe { ptr::addr_of!((*storage()).context).read() };
        if raw.is_null() {
            return None;
        }
        // SAFETY: the slot keeps one reference alive; take another.
        unsafe {
            Arc::increment_strong_count(raw);
            Some(Arc::from_raw(raw))
        }
    }

    pub(super) fn with<R>(f: impl FnOnce(Option<&ThreadContext>) -> R) -> R {
        // SAFETY: see `replace`; the reference cannot outlive the slot's
        // strong count because only this thread can clear it.
        let raw = unsafe { ptr::addr_of!((*storage()).context).read() };
        f(unsafe { raw.as_ref() })
    }
}

#[cfg(all(not(feature = "host"), not(target_arch = "aarch64")))]
compile_error!("the runtime needs the `host` feature or an aarch64 target");

/// Bind `context` to the calling thread, returning the previous binding.
pub fn set_current_thread(context: Arc<ThreadContext>) -> Option<Arc<ThreadContext>> {
    backend::replace(Some(context))
}

/// Unbind the calling thread's context.
pub fn take_current_thread() -> Option<Arc<ThreadContext>> {
    backend::replace(None)
}

/// Get the context of the calling thread, if the runtime knows it
pub fn current_thread() -> Option<Arc<ThreadContext>> {
    backend::current()
}

/// Run `f` with the calling thread's context.
///
/// # Panics
///
/// Panics when called from a thread that was neither bootstrapped nor
/// created by the runtime.
pub fn with_current_thread<R>(f: impl FnOnce(&ThreadContext) -> R) -> R {
    backend::with(|context| match context {
        Some(context) => f(context),
        None => panic!("no runtime thread context bound to this thread"),
    })
}

pub fn current_thread_handle() -> Handle {
    with_current_thread(|context| context.handle())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::Harness;
    use memoffset::offset_of;

    #[test]
    fn test_tls_layout() {
        assert_eq!(offset_of!(ThreadLocalStorage, command_buffer), 0);
        assert_eq!(offset_of!(ThreadLocalStorage, context), COMMAND_BUFFER_SIZE);
    }

    #[test]
    fn test_unbound_thread_has_no_context() {
        let observed = std::thread::spawn(|| current_thread().is_none()).join().unwrap();
        assert!(observed);
    }

    #[test]
    fn test_bootstrap_binds_main_thread() {
        let harness = Harness::new();
        let main = harness.runtime.threads().main_thread().clone();
        assert!(Arc::ptr_eq(&current_thread().unwrap(), &main));
        assert_eq!(current_thread_handle(), main.handle());
    }

    #[test]
    fn test_take_unbinds() {
        let _harness = Harness::new();
        assert!(take_current_thread().is_some());
        assert!(current_thread().is_none());
        assert!(std::panic::catch_unwind(current_thread_handle).is_err());
    }
}
