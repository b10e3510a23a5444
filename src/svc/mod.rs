// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Call Interface
//!
//! The runtime never issues a supervisor call directly. Every kernel entry
//! point it needs is a method of the [`Svc`] capability, and a [`Runtime`]
//! is bootstrapped with one implementation of it: a real transport on
//! hardware, or [`host::HostKernel`] when running on a development machine.
//!
//! # Design
//!
//! - **One method per syscall**: arguments and results keep the kernel's
//!   meaning, results are [`SvcResult`]
//! - **Handles**: plain 32-bit values; pseudo-handles name the caller
//! - **Address-keyed calls**: arbitration and process-wide keys take the
//!   address of a userland word and are `unsafe`
//!
//! [`Runtime`]: crate::init::Runtime

use bitflags::bitflags;
use core::fmt;

use crate::err::SvcResult;

#[cfg(feature = "host")]
pub mod host;

/// Timeout value meaning "wait forever".
pub const WAIT_FOREVER: i64 = -1;

/// Page granularity of every memory call.
pub const PAGE_SIZE: usize = 0x1000;

/// Lowest scheduling priority value accepted by the kernel (most urgent).
pub const HIGHEST_THREAD_PRIORITY: i32 = 0x00;

/// Highest scheduling priority value accepted by the kernel (least urgent).
pub const LOWEST_THREAD_PRIORITY: i32 = 0x3F;

/// Core id meaning "use the process default core".
pub const DEFAULT_CORE_ID: i32 = -2;

/// Highest explicit core id.
pub const MAX_CORE_ID: i32 = 3;

/// Maximum number of handles accepted by a single wait.
pub const MAX_WAIT_HANDLES: usize = 0x40;

/// Bit of an arbitrated lock word set while threads wait in the kernel.
///
/// The remaining bits hold the owner's handle, or `0` when unlocked.
pub const LOCK_HAS_LISTENERS: u32 = 0x4000_0000;

/// Entry point handed to the kernel when creating a thread.
pub type KernelThreadEntry = fn(usize);

/// ============================================================================
/// Handles
/// ============================================================================

/// A process-local reference to a kernel object
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u32);

impl Handle {
    /// The null handle
    pub const INVALID: Self = Self(0);

    /// Pseudo-handle naming the calling thread
    pub const CURRENT_THREAD: Self = Self(0xFFFF_8000);

    /// Pseudo-handle naming the calling process
    pub const CURRENT_PROCESS: Self = Self(0xFFFF_8001);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    pub const fn is_pseudo(self) -> bool {
        self.0 == Self::CURRENT_THREAD.0 || self.0 == Self::CURRENT_PROCESS.0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

/// ============================================================================
/// Memory
/// ============================================================================

/// Kind of memory found at an address
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryState {
    Free = 0x00,
    Io = 0x01,
    Static = 0x02,
    Code = 0x03,
    CodeData = 0x04,
    Heap = 0x05,
    Shared = 0x06,
    Alias = 0x07,
    ModuleCode = 0x08,
    ModuleCodeData = 0x09,
    Ipc = 0x0A,
    Stack = 0x0B,
    ThreadLocal = 0x0C,
    Transfered = 0x0D,
    SharedTransfered = 0x0E,
    SharedCode = 0x0F,
    Inaccessible = 0x10,
}

bitflags! {
    /// Access permitted on a memory region
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryPermission: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const DONT_CARE = 1 << 28;

        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const READ_EXECUTE = Self::READ.bits() | Self::EXECUTE.bits();
    }
}

bitflags! {
    /// Attributes of a memory region
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryAttribute: u32 {
        const LOCKED = 1 << 0;
        const IPC_LOCKED = 1 << 1;
        const DEVICE_SHARED = 1 << 2;
        const UNCACHED = 1 << 3;
    }
}

/// Description of the region containing a queried address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub address: usize,
    pub size: usize,
    pub state: MemoryState,
    pub attribute: MemoryAttribute,
    pub permission: MemoryPermission,
    pub ipc_ref_count: u32,
    pub device_ref_count: u32,
}

impl MemoryInfo {
    /// One past the last address of the region
    pub const fn end(&self) -> usize {
        self.address.saturating_add(self.size)
    }

    pub const fn contains(&self, address: usize) -> bool {
        address >= self.address && address < self.end()
    }
}

/// Selector of `get_info`
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoType {
    AllowedCpuIdBitmask = 0,
    AllowedThreadPriorityMask = 1,
    AliasRegionBaseAddr = 2,
    AliasRegionSize = 3,
    HeapRegionBaseAddr = 4,
    HeapRegionSize = 5,
    TotalMemoryAvailable = 6,
    TotalMemoryUsage = 7,
    IsCurrentProcessBeingDebugged = 8,
    ResourceLimit = 9,
    IdleTickCount = 10,
    RandomEntropy = 11,
    AddressSpaceBaseAddr = 12,
    AddressSpaceSize = 13,
    StackRegionBaseAddr = 14,
    StackRegionSize = 15,
}

/// Reason given to `break_execution`
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakReason {
    Panic = 0,
    Assert = 1,
    User = 2,
}

/// ============================================================================
/// Syscall Capability
/// ============================================================================

/// The kernel as seen by the runtime
///
/// Timeouts are in nanoseconds; a negative value waits forever and `0`
/// polls. Pseudo-handles are accepted wherever a thread or process handle
/// is expected.
pub trait Svc: Send + Sync {
    /// Create a suspended thread that will run `entry(argument)` on the
    /// stack ending at `stack_top`.
    fn create_thread(
        &self,
        entry: KernelThreadEntry,
        argument: usize,
        stack_top: usize,
        priority: i32,
        core_id: i32,
    ) -> SvcResult<Handle>;

    /// Let a created thread run. Starting a running thread is not an error.
    fn start_thread(&self, thread: Handle) -> SvcResult;

    /// Terminate the calling thread.
    ///
    /// A real kernel never returns from this call. The host simulation
    /// returns and lets the host thread unwind its entry function.
    fn exit_thread(&self);

    /// Sleep for `nanoseconds`; `0` yields.
    fn sleep_thread(&self, nanoseconds: i64);

    fn get_thread_priority(&self, thread: Handle) -> SvcResult<i32>;

    fn set_thread_priority(&self, thread: Handle, priority: i32) -> SvcResult;

    /// Wait until one of `handles` is signaled and return its index.
    fn wait_synchronization(&self, handles: &[Handle], timeout: i64) -> SvcResult<usize>;

    /// Block `requester` until it is handed the lock word at `address`.
    ///
    /// Returns immediately when the word no longer reads
    /// `owner | HAS_LISTENERS`.
    ///
    /// # Safety
    ///
    /// `address` must point to a live, 4-byte aligned lock word that stays
    /// valid for the duration of the call.
    unsafe fn arbitrate_lock(&self, owner: Handle, address: usize, requester: Handle) -> SvcResult;

    /// Hand the lock word at `address` to the next waiter, or clear it.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Svc::arbitrate_lock`].
    unsafe fn arbitrate_unlock(&self, address: usize) -> SvcResult;

    /// Release the lock word at `mutex_address` and wait on `key`.
    ///
    /// On success the kernel has re-acquired the lock on behalf of
    /// `requester`. On timeout the lock is not re-acquired.
    ///
    /// # Safety
    ///
    /// `mutex_address` must point to a live lock word held by `requester`
    /// that stays valid until the call returns.
    unsafe fn wait_process_wide_key_atomic(
        &self,
        mutex_address: usize,
        key: usize,
        requester: Handle,
        timeout: i64,
    ) -> SvcResult;

    /// Wake `count` waiters of `key`, or all of them when `count` is not
    /// positive.
    fn signal_process_wide_key(&self, key: usize, count: i32);

    /// Create an event; returns `(writable, readable)`.
    fn create_event(&self) -> SvcResult<(Handle, Handle)>;

    fn signal_event(&self, event: Handle) -> SvcResult;

    fn clear_event(&self, event: Handle) -> SvcResult;

    /// Clear a signaled event; fails with `INVALID_STATE` if it was clear.
    fn reset_signal(&self, event: Handle) -> SvcResult;

    /// Alias `size` bytes at `source` into the stack region at `destination`.
    fn map_memory(&self, destination: usize, source: usize, size: usize) -> SvcResult;

    fn unmap_memory(&self, destination: usize, source: usize, size: usize) -> SvcResult;

    fn query_memory(&self, address: usize) -> SvcResult<MemoryInfo>;

    fn get_info(&self, info: InfoType, handle: Handle, subtype: u64) -> SvcResult<u64>;

    fn close_handle(&self, handle: Handle) -> SvcResult;

    fn output_debug_string(&self, message: &str) -> SvcResult;

    /// Stop the process, handing `info` to the debugger.
    fn break_execution(&self, reason: BreakReason, info: &[u8]) -> !;
}
