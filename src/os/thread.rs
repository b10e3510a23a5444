// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread Management
//!
//! Userland side of a kernel thread: the stack alias it runs on, its
//! registry slot, its name and priority, and the state machine that keeps
//! the kernel thread from running user code before [`Thread::start`].
//!
//! # Design
//!
//! - **Stack aliasing**: the caller's stack is mapped a second time into
//!   the kernel's stack region; the kernel thread runs on the alias
//! - **Rendezvous**: the kernel thread parks on the context's condition
//!   variable while the state is `Initialized`
//! - **Teardown**: destroy waits for the kernel thread to exit, then frees
//!   the alias, closes the handle and leaves the [`ThreadList`]
//! - **Locks**: the context lock is never held across a call into the
//!   thread list or an allocator
//!
//! # Thread States
//!
//! ```text
//! Uninitialized -> Initialized -> Started -> Exited
//!                       |                      |
//!                       v                      v
//!                   Destroyed ---------> Uninitialized
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let thread = unsafe {
//!     Thread::create(&runtime, worker, argument, stack, STACK_SIZE, 0x2C, DEFAULT_CORE_ID)?
//! };
//! thread.set_name("Worker");
//! thread.start();
//! thread.wait();
//! thread.destroy();
//! ```
//!
//! [`ThreadList`]: crate::os::thread_list::ThreadList

use alloc::sync::Arc;
use core::fmt;
use core::ops::Deref;
use core::sync::atomic::{fence, AtomicU32, Ordering};

use crate::debug::{log_debug, log_trace, log_warn};
use crate::err::kernel::{CANCELLED, OUT_OF_RESOURCE};
use crate::err::{Error, Result};
use crate::init::Runtime;
use crate::os::condvar_impl::ConditionVariableImpl;
use crate::os::critical_section::Guarded;
use crate::os::thread_list::ThreadId;
use crate::os::tls;
use crate::svc::{
    Handle, Svc, DEFAULT_CORE_ID, HIGHEST_THREAD_PRIORITY, LOWEST_THREAD_PRIORITY, MAX_CORE_ID,
    PAGE_SIZE, WAIT_FOREVER,
};

/// Capacity of a thread name, terminator included
pub const THREAD_NAME_SIZE: usize = 0x20;

/// User entry point; receives the argument given at creation
pub type ThreadEntrypoint = fn(*mut u8);

/// ============================================================================
/// Thread State
/// ============================================================================

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Not created, or destroyed
    Uninitialized = 0,

    /// Kernel thread exists but is parked before user code
    Initialized = 1,

    /// Destroyed before start; the kernel thread exits without user code
    Destroyed = 2,

    /// User entry point released
    Started = 3,

    /// Entry point returned (or was skipped)
    Exited = 4,
}

/// ============================================================================
/// Thread Name
/// ============================================================================

/// Fixed-capacity thread name
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ThreadName {
    bytes: [u8; THREAD_NAME_SIZE],
    len: usize,
}

impl ThreadName {
    pub const EMPTY: Self = Self { bytes: [0; THREAD_NAME_SIZE], len: 0 };

    /// `None` if `name` does not fit with its terminator.
    pub fn new(name: &str) -> Option<Self> {
        if name.len() >= THREAD_NAME_SIZE {
            return None;
        }
        let mut bytes = [0; THREAD_NAME_SIZE];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Some(Self { bytes, len: name.len() })
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for ThreadName {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for ThreadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ThreadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ============================================================================
/// Thread Context
/// ============================================================================

#[derive(Debug, Clone, Copy)]
struct StackAlias {
    original: usize,
    mapped: usize,
    size: usize,
}

struct ThreadFields {
    state: ThreadState,
    entrypoint: Option<ThreadEntrypoint>,
    argument: *mut u8,
    stack: Option<StackAlias>,
    priority: i32,
    name: ThreadName,
    id: Option<ThreadId>,
}

// SAFETY: `argument` is opaque to the runtime; it is only handed back to
// the entry point, which the creator vouched for in `Thread::create`.
unsafe impl Send for ThreadFields {}

/// Shared state of one thread
///
/// Referenced by its [`Thread`] owner, by the thread's own TLS slot and by
/// the process thread list.
pub struct ThreadContext {
    kernel: Arc<dyn Svc>,
    handle: AtomicU32,
    fields: Guarded<ThreadFields>,
    condition_variable: ConditionVariableImpl,
}

impl ThreadContext {
    fn with_fields(kernel: Arc<dyn Svc>, handle: Handle, fields: ThreadFields) -> Self {
        Self {
            kernel,
            handle: AtomicU32::new(handle.raw()),
            fields: Guarded::new(fields),
            condition_variable: ConditionVariableImpl::new(),
        }
    }

    /// Context for a kernel thread that is already running, such as the
    /// bootstrap thread.
    pub fn adopt(kernel: Arc<dyn Svc>, handle: Handle, name: &str, priority: i32) -> Self {
        Self::with_fields(
            kernel,
            handle,
            ThreadFields {
                state: ThreadState::Started,
                entrypoint: None,
                argument: core::ptr::null_mut(),
                stack: None,
                priority,
                name: ThreadName::new(name).unwrap_or_default(),
                id: None,
            },
        )
    }

    pub fn kernel(&self) -> &dyn Svc {
        &*self.kernel
    }

    pub fn handle(&self) -> Handle {
        Handle::from_raw(self.handle.load(Ordering::Acquire))
    }

    pub fn state(&self) -> ThreadState {
        self.fields.lock().state
    }

    pub fn name(&self) -> ThreadName {
        self.fields.lock().name
    }

    pub fn set_name(&self, name: &str) {
        crate::rt_assert!(
            name.len() < THREAD_NAME_SIZE,
            "thread name {:?} is longer than {} bytes",
            name,
            THREAD_NAME_SIZE - 1
        );
        self.fields.lock().name = ThreadName::new(name).unwrap_or_default();
    }

    /// Registry slot, while the thread is registered
    pub fn id(&self) -> Option<ThreadId> {
        self.fields.lock().id
    }

    /// Priority the thread was created with or last changed to
    pub fn original_priority(&self) -> i32 {
        self.fields.lock().priority
    }

    /// Priority as the kernel currently sees it
    pub fn current_priority(&self) -> i32 {
        crate::rt_abort_on_err!(self.kernel.get_thread_priority(self.handle()))
    }

    /// Set a new priority and return the previous one.
    pub fn change_priority(&self, priority: i32) -> i32 {
        crate::rt_assert!(
            (HIGHEST_THREAD_PRIORITY..=LOWEST_THREAD_PRIORITY).contains(&priority),
            "thread priority {:#x} out of range",
            priority
        );
        let mut fields = self.fields.lock();
        crate::rt_abort_on_err!(self.kernel.set_thread_priority(self.handle(), priority));
        core::mem::replace(&mut fields.priority, priority)
    }
}

impl fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadContext").field("handle", &self.handle()).finish_non_exhaustive()
    }
}

/// ============================================================================
/// Thread
/// ============================================================================

/// Owner of a runtime-created thread
///
/// Dropping an initialized thread destroys it, which waits for it to exit.
pub struct Thread {
    runtime: Arc<Runtime>,
    context: Arc<ThreadContext>,
}

impl Thread {
    /// Create a parked kernel thread running `entrypoint(argument)` on an
    /// alias of `stack`.
    ///
    /// Fails with [`Error::OutOfResource`] when the kernel stays out of
    /// thread slots or the stack region has no room for the alias.
    ///
    /// # Safety
    ///
    /// `stack` must point to `stack_size` bytes the caller keeps alive and
    /// untouched until the thread is destroyed, and `argument` must be
    /// valid for `entrypoint` on another thread.
    pub unsafe fn create(
        runtime: &Arc<Runtime>,
        entrypoint: ThreadEntrypoint,
        argument: *mut u8,
        stack: *mut u8,
        stack_size: usize,
        priority: i32,
        core_id: i32,
    ) -> Result<Thread> {
        crate::rt_assert!(!stack.is_null(), "thread stack is null");
        crate::rt_assert!(
            stack_size != 0 && stack_size % PAGE_SIZE == 0,
            "thread stack size {:#x} is not a non-zero multiple of the page size",
            stack_size
        );
        crate::rt_assert!(
            (HIGHEST_THREAD_PRIORITY..=LOWEST_THREAD_PRIORITY).contains(&priority),
            "thread priority {:#x} out of range",
            priority
        );
        crate::rt_assert!(
            core_id == DEFAULT_CORE_ID || (0..=MAX_CORE_ID).contains(&core_id),
            "core id {} out of range",
            core_id
        );

        let alias = map_stack_alias(runtime, stack as usize, stack_size)?;
        let context = Arc::new(ThreadContext::with_fields(
            runtime.kernel().clone(),
            Handle::INVALID,
            ThreadFields {
                state: ThreadState::Initialized,
                entrypoint: Some(entrypoint),
                argument,
                stack: Some(alias),
                priority,
                name: ThreadName::new(runtime.config().default_thread_name).unwrap_or_default(),
                id: None,
            },
        ));

        let stack_top = alias.mapped + alias.size;
        let handle = match create_kernel_thread(runtime, &context, stack_top, priority, core_id) {
            Ok(handle) => handle,
            Err(error) => {
                unmap_stack_alias(runtime, &alias);
                return Err(error);
            }
        };
        context.handle.store(handle.raw(), Ordering::Release);

        let id = runtime.threads().add(context.clone());
        context.fields.lock().id = Some(id);
        log_debug!(
            "thread {:?} created: slot {}, stack {:#x} aliased at {:#x}",
            handle,
            id.index(),
            alias.original,
            alias.mapped
        );

        Ok(Thread { runtime: runtime.clone(), context })
    }

    pub fn context(&self) -> &Arc<ThreadContext> {
        &self.context
    }

    /// Let the kernel thread run its entry point.
    pub fn start(&self) {
        let context = &self.context;
        let mut fields = context.fields.lock();
        crate::rt_assert!(
            fields.state == ThreadState::Initialized,
            "thread started in state {:?}",
            fields.state
        );
        crate::rt_abort_on_err!(context.kernel.start_thread(context.handle()));
        fields.state = ThreadState::Started;
        context.condition_variable.signal();
        log_trace!("thread {:?} started", context.handle());
    }

    /// Block until the thread has exited and release its stack alias.
    ///
    /// The handle and the registry slot stay until [`Thread::destroy`].
    pub fn wait(&self) {
        let state = self.context.state();
        crate::rt_assert!(
            state != ThreadState::Uninitialized && state != ThreadState::Initialized,
            "waited on a thread in state {:?}",
            state
        );
        wait_for_exit(self.context.kernel(), self.context.handle());
        self.release_stack();
    }

    /// Tear the thread down, waiting for it to exit first.
    ///
    /// A thread that was never started exits without running its entry
    /// point.
    pub fn destroy(self) {
        self.destroy_in_place();
    }

    fn destroy_in_place(&self) {
        let context = &self.context;
        let handle = context.handle();
        {
            let mut fields = context.fields.lock();
            crate::rt_assert!(fields.state != ThreadState::Uninitialized, "thread destroyed twice");
            if fields.state == ThreadState::Initialized {
                crate::rt_abort_on_err!(context.kernel.start_thread(handle));
                fields.state = ThreadState::Destroyed;
                context.condition_variable.signal();
            }
        }

        wait_for_exit(context.kernel(), handle);
        self.release_stack();
        crate::rt_abort_on_err!(context.kernel.close_handle(handle));

        let id = context.fields.lock().id.take();
        if let Some(id) = id {
            self.runtime.threads().remove(id);
        }

        {
            let mut fields = context.fields.lock();
            fields.state = ThreadState::Uninitialized;
            fields.entrypoint = None;
            fields.argument = core::ptr::null_mut();
            fields.name = ThreadName::EMPTY;
        }
        context.handle.store(Handle::INVALID.raw(), Ordering::Release);
        log_debug!("thread {:?} destroyed", handle);
    }

    fn release_stack(&self) {
        let alias = self.context.fields.lock().stack.take();
        if let Some(alias) = alias {
            unmap_stack_alias(&self.runtime, &alias);
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Thread").field(&self.context).finish()
    }
}

impl Deref for Thread {
    type Target = ThreadContext;

    fn deref(&self) -> &ThreadContext {
        &self.context
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if self.context.state() != ThreadState::Uninitialized {
            self.destroy_in_place();
        }
    }
}

/// ============================================================================
/// Internals
/// ============================================================================

fn map_stack_alias(runtime: &Runtime, original: usize, size: usize) -> Result<StackAlias> {
    let allocator = runtime.stack_allocator();
    let kernel = runtime.kernel();
    let Some(mapped) = allocator.reserve(&**kernel, size, runtime.config().stack_alignment) else {
        log_warn!("no room for a {:#x} byte stack alias", size);
        return Err(Error::OutOfResource);
    };
    if let Err(code) = kernel.map_memory(mapped, original, size) {
        allocator.release(mapped, size);
        log_warn!("mapping stack {:#x} at {:#x} failed: {}", original, mapped, code);
        return Err(Error::Kernel(code));
    }
    log_trace!("stack {:#x} mapped at {:#x} ({:#x} bytes)", original, mapped, size);
    Ok(StackAlias { original, mapped, size })
}

fn unmap_stack_alias(runtime: &Runtime, alias: &StackAlias) {
    crate::rt_abort_on_err!(runtime.kernel().unmap_memory(alias.mapped, alias.original, alias.size));
    runtime.stack_allocator().release(alias.mapped, alias.size);
}

fn create_kernel_thread(
    runtime: &Runtime,
    context: &Arc<ThreadContext>,
    stack_top: usize,
    priority: i32,
    core_id: i32,
) -> Result<Handle> {
    let retry_count = runtime.config().create_thread_retry_count;
    let argument = Arc::into_raw(context.clone()) as usize;

    let mut retries = 0;
    let outcome = loop {
        match runtime.kernel().create_thread(thread_entry_wrapper, argument, stack_top, priority, core_id) {
            Ok(handle) => break Ok(handle),
            Err(code) if code.same_description(OUT_OF_RESOURCE) => {
                retries += 1;
                if retries > retry_count {
                    log_warn!("kernel out of thread slots after {} retries", retry_count);
                    break Err(Error::OutOfResource);
                }
                log_debug!("kernel out of thread slots, retry {}/{}", retries, retry_count);
            }
            Err(code) => crate::rt_abort_result!(code, "kernel thread creation failed"),
        }
    };

    if outcome.is_err() {
        // SAFETY: no kernel thread received the reference.
        drop(unsafe { Arc::from_raw(argument as *const ThreadContext) });
    }
    outcome
}

/// First code of every runtime-created kernel thread.
fn thread_entry_wrapper(argument: usize) {
    // SAFETY: `create_kernel_thread` leaked one reference for this thread.
    let context = unsafe { Arc::from_raw(argument as *const ThreadContext) };
    tls::set_current_thread(context.clone());
    fence(Ordering::SeqCst);

    let run = {
        let mut fields = context.fields.lock();
        while fields.state == ThreadState::Initialized {
            fields.wait(&context.condition_variable);
        }
        let argument = fields.argument;
        match fields.state {
            ThreadState::Started => fields.entrypoint.map(|entrypoint| (entrypoint, argument)),
            _ => None,
        }
    };
    if let Some((entrypoint, argument)) = run {
        entrypoint(argument);
    }

    {
        let mut fields = context.fields.lock();
        fields.state = ThreadState::Exited;
        context.condition_variable.broadcast();
    }

    let kernel = context.kernel.clone();
    drop(tls::take_current_thread());
    drop(context);
    kernel.exit_thread();
}

fn wait_for_exit(kernel: &dyn Svc, handle: Handle) {
    loop {
        match kernel.wait_synchronization(&[handle], WAIT_FOREVER) {
            Ok(_) => return,
            Err(code) if code.matches(CANCELLED) => continue,
            Err(code) => crate::rt_abort_result!(code, "waiting for thread {:?} failed", handle),
        }
    }
}

/// ============================================================================
/// Current Thread
/// ============================================================================

/// Context of the calling thread, if the runtime knows it
pub fn current_thread() -> Option<Arc<ThreadContext>> {
    tls::current_thread()
}

/// Sleep the calling thread for `nanoseconds`.
pub fn sleep_thread(nanoseconds: i64) {
    tls::with_current_thread(|thread| thread.kernel().sleep_thread(nanoseconds));
}

/// Give the rest of the time slice to another thread.
pub fn yield_thread() {
    sleep_thread(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::Harness;

    #[test]
    fn test_thread_name_capacity() {
        assert_eq!(ThreadName::new("Worker").unwrap().as_str(), "Worker");
        assert!(ThreadName::new(&"x".repeat(THREAD_NAME_SIZE - 1)).is_some());
        assert!(ThreadName::new(&"x".repeat(THREAD_NAME_SIZE)).is_none());
        assert!(ThreadName::default().is_empty());
    }

    #[test]
    fn test_main_thread_context() {
        let harness = Harness::new();
        let main = harness.runtime.threads().main_thread().clone();
        assert_eq!(main.name().as_str(), "MainThread");
        assert_eq!(main.state(), ThreadState::Started);
        assert_eq!(main.original_priority(), harness.kernel.config().default_priority);
        assert!(Arc::ptr_eq(&current_thread().unwrap(), &main));
    }

    #[test]
    fn test_change_main_priority() {
        let harness = Harness::new();
        let main = harness.runtime.threads().main_thread();
        let old = main.change_priority(0x20);
        assert_eq!(old, harness.kernel.config().default_priority);
        assert_eq!(main.original_priority(), 0x20);
        assert_eq!(main.current_priority(), 0x20);
    }

    #[test]
    #[should_panic(expected = "longer than")]
    fn test_long_name_aborts() {
        let harness = Harness::new();
        harness.runtime.threads().main_thread().set_name(&"x".repeat(THREAD_NAME_SIZE));
    }

    #[test]
    fn test_sleep_and_yield() {
        let _harness = Harness::new();
        sleep_thread(1_000);
        yield_thread();
    }
}
