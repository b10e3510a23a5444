// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Event
//!
//! An event object owned by the kernel and reached through two handles:
//! the readable side waits, the writable side signals. Either handle can
//! be popped out and sent to another process, which then adopts it with
//! [`KernelEvent::load`].
//!
//! # Design
//!
//! - **Ownership**: each handle still held by the event is closed exactly
//!   once, by [`KernelEvent::destroy`] or on drop
//! - **Auto-clear**: mirrored in userland by resetting the kernel signal
//!   after a successful wait or poll
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut event = KernelEvent::new();
//! event.create(true)?;
//! let remote = event.pop_readable_handle();
//! event.signal()?;
//! ```

use crate::debug::log_trace;
use crate::err::kernel::{CANCELLED, INVALID_STATE, TIMED_OUT};
use crate::err::Result;
use crate::os::tls;
use crate::svc::{Handle, Svc, WAIT_FOREVER};

/// Lifecycle of a [`KernelEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelEventState {
    Uninitialized,
    Initialized,
}

#[derive(Debug)]
pub struct KernelEvent {
    state: KernelEventState,
    is_auto_clear: bool,
    readable_handle: Option<Handle>,
    writable_handle: Option<Handle>,
}

fn with_kernel<R>(f: impl FnOnce(&dyn Svc) -> R) -> R {
    tls::with_current_thread(|thread| f(thread.kernel()))
}

impl KernelEvent {
    pub const fn new() -> Self {
        Self {
            state: KernelEventState::Uninitialized,
            is_auto_clear: false,
            readable_handle: None,
            writable_handle: None,
        }
    }

    pub fn state(&self) -> KernelEventState {
        self.state
    }

    pub fn is_auto_clear(&self) -> bool {
        self.is_auto_clear
    }

    pub fn readable_handle(&self) -> Option<Handle> {
        self.readable_handle
    }

    pub fn writable_handle(&self) -> Option<Handle> {
        self.writable_handle
    }

    fn assert_initialized(&self) {
        crate::rt_assert!(self.state == KernelEventState::Initialized, "kernel event is not initialized");
    }

    fn readable(&self) -> Handle {
        self.assert_initialized();
        match self.readable_handle {
            Some(handle) => handle,
            None => crate::rt_abort!("kernel event has no readable handle"),
        }
    }

    fn writable(&self) -> Handle {
        self.assert_initialized();
        match self.writable_handle {
            Some(handle) => handle,
            None => crate::rt_abort!("kernel event has no writable handle"),
        }
    }

    /// Allocate a new kernel event with both handles.
    pub fn create(&mut self, is_auto_clear: bool) -> Result {
        crate::rt_assert!(self.state == KernelEventState::Uninitialized, "kernel event created twice");
        let (writable, readable) = with_kernel(|kernel| kernel.create_event())?;
        log_trace!("kernel event created: writable {:?}, readable {:?}", writable, readable);

        self.is_auto_clear = is_auto_clear;
        self.readable_handle = Some(readable);
        self.writable_handle = Some(writable);
        self.state = KernelEventState::Initialized;
        Ok(())
    }

    /// Adopt handles obtained elsewhere. The event now owns them.
    pub fn load(&mut self, readable: Option<Handle>, writable: Option<Handle>, is_auto_clear: bool) {
        crate::rt_assert!(self.state == KernelEventState::Uninitialized, "kernel event loaded twice");
        crate::rt_assert!(
            readable.is_some() || writable.is_some(),
            "a kernel event needs at least one handle"
        );
        self.is_auto_clear = is_auto_clear;
        self.readable_handle = readable;
        self.writable_handle = writable;
        self.state = KernelEventState::Initialized;
    }

    /// Block until the event is signaled; clear it if auto-clear.
    pub fn wait(&self) {
        let readable = self.readable();
        with_kernel(|kernel| loop {
            match kernel.wait_synchronization(&[readable], WAIT_FOREVER) {
                Ok(_) => {}
                Err(code) if code.matches(CANCELLED) || code.matches(TIMED_OUT) => continue,
                Err(code) => crate::rt_abort_result!(code),
            }
            if !self.is_auto_clear {
                return;
            }
            match kernel.reset_signal(readable) {
                Ok(()) => return,
                // Another waiter consumed the signal first; wait for the
                // next one.
                Err(code) if code.matches(INVALID_STATE) => continue,
                Err(code) => crate::rt_abort_result!(code),
            }
        })
    }

    /// Poll the event; an auto-clear event is cleared if it was signaled.
    pub fn is_signaled(&self) -> bool {
        let readable = self.readable();
        with_kernel(|kernel| {
            if self.is_auto_clear {
                return kernel.reset_signal(readable).is_ok();
            }
            loop {
                match kernel.wait_synchronization(&[readable], 0) {
                    Ok(_) => return true,
                    Err(code) if code.matches(TIMED_OUT) => return false,
                    Err(code) if code.matches(CANCELLED) => continue,
                    Err(code) => crate::rt_abort_result!(code),
                }
            }
        })
    }

    pub fn signal(&self) -> Result {
        let writable = self.writable();
        with_kernel(|kernel| kernel.signal_event(writable))?;
        Ok(())
    }

    pub fn clear(&self) -> Result {
        self.assert_initialized();
        let Some(handle) = self.readable_handle.or(self.writable_handle) else {
            crate::rt_abort!("kernel event has no handle left");
        };
        with_kernel(|kernel| kernel.clear_event(handle))?;
        Ok(())
    }

    /// Take the readable handle out; the caller now owns it.
    pub fn pop_readable_handle(&mut self) -> Handle {
        let handle = self.readable();
        self.readable_handle = None;
        handle
    }

    /// Take the writable handle out; the caller now owns it.
    pub fn pop_writable_handle(&mut self) -> Handle {
        let handle = self.writable();
        self.writable_handle = None;
        handle
    }

    /// Close the handles still owned and return to uninitialized.
    pub fn destroy(&mut self) {
        self.assert_initialized();
        let handles = [self.readable_handle.take(), self.writable_handle.take()];
        with_kernel(|kernel| {
            for handle in handles.into_iter().flatten() {
                crate::rt_abort_on_err!(kernel.close_handle(handle));
            }
        });
        self.is_auto_clear = false;
        self.state = KernelEventState::Uninitialized;
    }
}

impl Default for KernelEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for KernelEvent {
    fn drop(&mut self) {
        if self.state == KernelEventState::Initialized {
            self.destroy();
        }
    }
}
