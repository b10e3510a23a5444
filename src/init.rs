// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Runtime Initialization
//!
//! The process-wide state of the runtime lives in one [`Runtime`] value,
//! built once by the bootstrap thread and shared by reference from then on.
//!
//! # Initialization Order
//!
//! 1. Bind the bootstrap thread's context to its TLS slot
//! 2. Build the thread list around it
//! 3. Read the address-space and stack-region bounds from the kernel
//! 4. Build the two address allocators over those bounds
//!
//! # Usage
//!
//! ```rust,ignore
//! let runtime = Runtime::bootstrap(kernel, main_thread_handle, RuntimeConfig::default());
//! let thread = unsafe { Thread::create(&runtime, worker, arg, stack, size, 0x2C, -2)? };
//! ```

use alloc::sync::Arc;
use core::fmt;

use crate::debug::{log_debug, log_info};
use crate::os::thread::ThreadContext;
use crate::os::thread_list::ThreadList;
use crate::os::tls;
use crate::os::vmem::VirtualMemoryAllocator;
use crate::svc::{Handle, InfoType, Svc, PAGE_SIZE};

/// ============================================================================
/// Configuration
/// ============================================================================

/// Tunables of the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Unmapped space left in front of every reservation
    pub guard_page_size: usize,

    /// Alignment of stack aliases
    pub stack_alignment: usize,

    /// Extra kernel thread creation attempts while the kernel is out of
    /// thread slots
    pub create_thread_retry_count: u32,

    pub main_thread_name: &'static str,

    pub default_thread_name: &'static str,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            guard_page_size: PAGE_SIZE,
            stack_alignment: PAGE_SIZE,
            create_thread_retry_count: 8,
            main_thread_name: "MainThread",
            default_thread_name: "UnnamedThread",
        }
    }
}

/// ============================================================================
/// Runtime
/// ============================================================================

/// Process-wide runtime state
pub struct Runtime {
    kernel: Arc<dyn Svc>,
    config: RuntimeConfig,
    threads: ThreadList,
    address_space_allocator: VirtualMemoryAllocator,
    stack_allocator: VirtualMemoryAllocator,
}

/// Read a `(base, size)` pair from the kernel as a `[start, end)` window.
fn region_bounds(kernel: &dyn Svc, base: InfoType, size: InfoType) -> (usize, usize) {
    let start = crate::rt_abort_on_err!(kernel.get_info(base, Handle::CURRENT_PROCESS, 0)) as usize;
    let size = crate::rt_abort_on_err!(kernel.get_info(size, Handle::CURRENT_PROCESS, 0)) as usize;
    match start.checked_add(size) {
        Some(end) => (start, end),
        None => crate::rt_abort!("region {:#x}+{:#x} overflows the address space", start, size),
    }
}

impl Runtime {
    /// Set up the runtime on the calling thread, whose kernel handle is
    /// `main_thread`.
    ///
    /// Aborts if the kernel cannot describe the process address space.
    pub fn bootstrap(kernel: Arc<dyn Svc>, main_thread: Handle, config: RuntimeConfig) -> Arc<Runtime> {
        let priority = kernel.get_thread_priority(main_thread);
        let main = Arc::new(ThreadContext::adopt(
            kernel.clone(),
            main_thread,
            config.main_thread_name,
            priority.unwrap_or(0),
        ));
        tls::set_current_thread(main.clone());
        crate::rt_abort_on_err!(priority, "main thread {:?} has no priority", main_thread);

        let threads = ThreadList::new(main);

        let (space_start, space_end) =
            region_bounds(&*kernel, InfoType::AddressSpaceBaseAddr, InfoType::AddressSpaceSize);
        let (stack_start, stack_end) =
            region_bounds(&*kernel, InfoType::StackRegionBaseAddr, InfoType::StackRegionSize);
        log_debug!("address space {:#x}..{:#x}", space_start, space_end);
        log_debug!("stack region {:#x}..{:#x}", stack_start, stack_end);

        let runtime = Runtime {
            address_space_allocator: VirtualMemoryAllocator::new(
                space_start,
                space_end,
                config.guard_page_size,
            ),
            stack_allocator: VirtualMemoryAllocator::new(stack_start, stack_end, config.guard_page_size),
            kernel,
            config,
            threads,
        };
        log_info!("runtime ready on main thread {:?}", main_thread);
        Arc::new(runtime)
    }

    pub fn kernel(&self) -> &Arc<dyn Svc> {
        &self.kernel
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn threads(&self) -> &ThreadList {
        &self.threads
    }

    /// Allocator over the whole process address space
    pub fn address_space_allocator(&self) -> &VirtualMemoryAllocator {
        &self.address_space_allocator
    }

    /// Allocator over the region reserved for thread stacks
    pub fn stack_allocator(&self) -> &VirtualMemoryAllocator {
        &self.stack_allocator
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("threads", &self.threads)
            .field("address_space_allocator", &self.address_space_allocator)
            .field("stack_allocator", &self.stack_allocator)
            .finish_non_exhaustive()
    }
}
