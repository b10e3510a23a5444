// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Runtime Test Support
//!
//! A [`Harness`] boots a runtime on a fresh [`HostKernel`] for the calling
//! test thread. The scenario modules below run real threads through it.

mod sync_tests;

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use std::time::{Duration, Instant};

use crate::init::{Runtime, RuntimeConfig};
use crate::os::thread::{Thread, ThreadEntrypoint};
use crate::os::tls;
use crate::svc::host::{HostConfig, HostKernel};
use crate::svc::{DEFAULT_CORE_ID, PAGE_SIZE};

/// Stack size used by scenario threads
pub(crate) const TEST_STACK_SIZE: usize = 4 * PAGE_SIZE;

/// Priority used by scenario threads
pub(crate) const TEST_PRIORITY: i32 = 0x2C;

/// A booted runtime bound to the calling test thread
pub(crate) struct Harness {
    pub kernel: HostKernel,
    pub runtime: Arc<Runtime>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(HostConfig::default(), RuntimeConfig::default())
    }

    pub fn with_config(host: HostConfig, config: RuntimeConfig) -> Self {
        let kernel = HostKernel::with_config(host);
        let main_thread = kernel.register_current_thread();
        let runtime = Runtime::bootstrap(Arc::new(kernel.clone()), main_thread, config);
        Self { kernel, runtime }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        drop(tls::take_current_thread());
    }
}

/// Backing memory for a thread stack
///
/// The host kernel only maps it; nothing ever runs on it.
pub(crate) struct TestStack {
    memory: Vec<u8>,
}

impl TestStack {
    pub fn new() -> Self {
        Self::with_size(TEST_STACK_SIZE)
    }

    pub fn with_size(size: usize) -> Self {
        Self { memory: vec![0; size] }
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.memory.as_mut_ptr()
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }
}

/// Create a parked thread running `entry` with `argument`.
pub(crate) fn create_thread(
    harness: &Harness,
    entry: ThreadEntrypoint,
    argument: *mut u8,
    stack: &mut TestStack,
) -> Thread {
    // SAFETY: every scenario keeps its stack and argument alive until the
    // thread is destroyed.
    let thread = unsafe {
        Thread::create(
            &harness.runtime,
            entry,
            argument,
            stack.as_mut_ptr(),
            stack.len(),
            TEST_PRIORITY,
            DEFAULT_CORE_ID,
        )
    };
    thread.unwrap()
}

/// Pass `value` to a thread entry point.
pub(crate) fn argument_of<T: Sync>(value: &T) -> *mut u8 {
    value as *const T as *mut u8
}

/// Recover the value behind an entry point argument.
///
/// # Safety
///
/// `argument` must come from [`argument_of`] with a `T` that is still alive.
pub(crate) unsafe fn shared<'a, T>(argument: *mut u8) -> &'a T {
    &*(argument as *const T)
}

/// Poll `condition` until it holds, failing the test after `timeout`.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached within {:?}", timeout);
        std::thread::sleep(Duration::from_millis(1));
    }
}
