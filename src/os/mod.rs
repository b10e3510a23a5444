// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Runtime OS Primitives
//!
//! Threads and the synchronization objects user code shares between them.
//!
//! # Primitives
//!
//! - **CriticalSection**: kernel-arbitrated lock word, the base of the rest
//! - **Mutex** / **ConditionVariable**: owner-tracked lock and its wait queue
//! - **UserEvent** / **KernelEvent**: in-process flag and kernel event object
//! - **Barrier**: one-shot rendezvous of a fixed number of threads
//! - **Thread**: kernel thread lifecycle, stack aliasing and registry
//!
//! # Design
//!
//! Each object embeds its own critical section. None of them enters a
//! foreign section while holding its own.

pub mod barrier;
pub mod condvar;
pub mod condvar_impl;
pub mod critical_section;
pub mod kernel_event;
pub mod mutex;
pub mod thread;
pub mod thread_list;
pub mod tls;
pub mod user_event;
pub mod vmem;

// Re-exports
pub use barrier::Barrier;
pub use condvar::{ConditionVariable, ConditionVariableStatus};
pub use condvar_impl::ConditionVariableImpl;
pub use critical_section::{CriticalSection, Guarded, GuardedRef};
pub use kernel_event::{KernelEvent, KernelEventState};
pub use mutex::{Mutex, MutexGuard};
pub use thread::{
    current_thread, sleep_thread, yield_thread, Thread, ThreadContext, ThreadEntrypoint, ThreadName,
    ThreadState, THREAD_NAME_SIZE,
};
pub use thread_list::{ThreadId, ThreadList};
pub use user_event::UserEvent;
pub use vmem::VirtualMemoryAllocator;

/// Lifecycle of the user-initializable objects
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Uninitialized = 0,
    Initialized = 1,
}
