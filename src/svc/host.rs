// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Host Kernel
//!
//! A kernel simulation backed by host threads, used to run the runtime and
//! its tests on a development machine. It keeps a handle table, the
//! arbitration and process-wide key queues, events, thread objects and a
//! map of the stack region, all behind one host mutex.
//!
//! # Design
//!
//! - **Blocking**: every blocked call parks on a single host condvar and
//!   re-checks its own wake condition, so wake-ups are never lost
//! - **Lock words**: userland lock words are read and written with atomics
//!   while the state mutex is held, mirroring what a kernel does with user
//!   memory
//! - **Fault injection**: [`HostKernel::inject_fault`] makes the next calls
//!   of a syscall fail with a chosen result, which is how tests drive the
//!   runtime's retry paths deterministically
//!
//! # Usage
//!
//! ```rust,ignore
//! let kernel = HostKernel::new();
//! let main_thread = kernel.register_current_thread();
//! let runtime = Runtime::bootstrap(Arc::new(kernel.clone()), main_thread, RuntimeConfig::default());
//! ```

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::{
    BreakReason, Handle, InfoType, KernelThreadEntry, MemoryAttribute, MemoryInfo, MemoryPermission,
    MemoryState, Svc, DEFAULT_CORE_ID, HIGHEST_THREAD_PRIORITY, LOCK_HAS_LISTENERS,
    LOWEST_THREAD_PRIORITY, MAX_CORE_ID, MAX_WAIT_HANDLES, PAGE_SIZE,
};
use crate::debug::{log_debug, log_trace};
use crate::err::{kernel, ResultCode, SvcResult};

std::thread_local! {
    /// Raw handle of the simulated thread running on this host thread
    static CURRENT_THREAD: Cell<u32> = const { Cell::new(0) };
}

const FIRST_HANDLE: u32 = 0x100;

/// Layout of the simulated process
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub address_space_base: usize,
    pub address_space_size: usize,
    pub stack_region_base: usize,
    pub stack_region_size: usize,

    /// Live thread objects allowed before `create_thread` reports
    /// `OUT_OF_RESOURCE`
    pub max_threads: usize,

    /// Priority of threads registered with `register_current_thread`
    pub default_priority: i32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address_space_base: 0x0800_0000,
            address_space_size: 0x7800_0000,
            stack_region_base: 0x4000_0000,
            stack_region_size: 0x1000_0000,
            max_threads: 64,
            default_priority: 0x2C,
        }
    }
}

/// Syscalls that can be made to fail with [`HostKernel::inject_fault`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    CreateThread,
    StartThread,
    GetThreadPriority,
    SetThreadPriority,
    WaitSynchronization,
    ArbitrateLock,
    ArbitrateUnlock,
    WaitProcessWideKeyAtomic,
    CreateEvent,
    SignalEvent,
    ClearEvent,
    ResetSignal,
    MapMemory,
    UnmapMemory,
    QueryMemory,
    GetInfo,
    CloseHandle,
}

#[derive(Debug, Clone, Copy)]
enum Object {
    Thread(u64),
    ReadableEvent(u64),
    WritableEvent(u64),
}

struct ThreadObject {
    entry: Option<KernelThreadEntry>,
    argument: usize,
    priority: i32,
    started: bool,
    exited: bool,
}

struct EventObject {
    signaled: bool,
}

struct LockWaiter {
    id: u64,
    address: usize,
    tag: u32,
}

struct KeyWaiter {
    id: u64,
    key: usize,
    mutex_address: usize,
    tag: u32,
}

struct MappedRegion {
    size: usize,
    source: usize,
}

struct Fault {
    call: Syscall,
    code: ResultCode,
    remaining: usize,
}

struct KernelState {
    next_handle: u32,
    next_id: u64,
    handles: BTreeMap<u32, Object>,
    threads: BTreeMap<u64, ThreadObject>,
    events: BTreeMap<u64, EventObject>,
    lock_waiters: Vec<LockWaiter>,
    key_waiters: Vec<KeyWaiter>,
    granted: BTreeSet<u64>,
    regions: BTreeMap<usize, MappedRegion>,
    faults: Vec<Fault>,
    debug_output: String,
}

/// Reinterpret a userland address as a lock word.
///
/// # Safety
///
/// `address` must point to a live, aligned `u32` for the lifetime `'a`.
unsafe fn lock_word<'a>(address: usize) -> &'a AtomicU32 {
    &*(address as *const AtomicU32)
}

fn deadline(timeout: i64) -> Option<Instant> {
    if timeout < 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_nanos(timeout as u64))
    }
}

impl KernelState {
    fn new() -> Self {
        Self {
            next_handle: FIRST_HANDLE,
            next_id: 1,
            handles: BTreeMap::new(),
            threads: BTreeMap::new(),
            events: BTreeMap::new(),
            lock_waiters: Vec::new(),
            key_waiters: Vec::new(),
            granted: BTreeSet::new(),
            regions: BTreeMap::new(),
            faults: Vec::new(),
            debug_output: String::new(),
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_handle(&mut self, object: Object) -> Handle {
        let raw = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(raw, object);
        Handle::from_raw(raw)
    }

    fn object(&self, handle: Handle) -> SvcResult<Object> {
        let raw = if handle == Handle::CURRENT_THREAD {
            CURRENT_THREAD.with(Cell::get)
        } else {
            handle.raw()
        };
        self.handles.get(&raw).copied().ok_or(kernel::INVALID_HANDLE)
    }

    fn thread(&mut self, handle: Handle) -> SvcResult<&mut ThreadObject> {
        match self.object(handle)? {
            Object::Thread(id) => self.threads.get_mut(&id).ok_or(kernel::INVALID_HANDLE),
            _ => Err(kernel::INVALID_HANDLE),
        }
    }

    fn take_fault(&mut self, call: Syscall) -> SvcResult {
        let Some(index) = self.faults.iter().position(|fault| fault.call == call) else {
            return Ok(());
        };
        let fault = &mut self.faults[index];
        let code = fault.code;
        fault.remaining -= 1;
        if fault.remaining == 0 {
            self.faults.remove(index);
        }
        log_trace!("host kernel: injected {:?} for {:?}", code, call);
        Err(code)
    }

    fn is_signaled(&self, handle: Handle) -> SvcResult<bool> {
        match self.object(handle)? {
            Object::Thread(id) => Ok(self.threads.get(&id).map_or(true, |thread| thread.exited)),
            Object::ReadableEvent(id) => Ok(self.events.get(&id).map_or(false, |event| event.signaled)),
            Object::WritableEvent(_) => Err(kernel::INVALID_HANDLE),
        }
    }

    fn live_threads(&self) -> usize {
        self.threads.values().filter(|thread| !thread.exited).count()
    }

    /// Hand the lock word at `address` to its first waiter, or clear it.
    ///
    /// # Safety
    ///
    /// `address` must point to a live lock word.
    unsafe fn release_lock(&mut self, address: usize) {
        let word = lock_word(address);
        match self.lock_waiters.iter().position(|waiter| waiter.address == address) {
            Some(index) => {
                let waiter = self.lock_waiters.remove(index);
                let contended = self.lock_waiters.iter().any(|other| other.address == address);
                let flag = if contended { LOCK_HAS_LISTENERS } else { 0 };
                word.store(waiter.tag | flag, Ordering::SeqCst);
                self.granted.insert(waiter.id);
            }
            None => word.store(0, Ordering::SeqCst),
        }
    }

    fn mapped_region(&self, address: usize) -> Option<(usize, &MappedRegion)> {
        self.regions
            .range(..=address)
            .next_back()
            .filter(|(start, region)| address - **start < region.size)
            .map(|(start, region)| (*start, region))
    }
}

struct Shared {
    config: HostConfig,
    state: Mutex<KernelState>,
    wakeup: Condvar,
}

/// The simulated kernel
///
/// Cloning is cheap and every clone talks to the same kernel.
#[derive(Clone)]
pub struct HostKernel {
    shared: Arc<Shared>,
}

impl Default for HostKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl HostKernel {
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    pub fn with_config(config: HostConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(KernelState::new()),
                wakeup: Condvar::new(),
            }),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.shared.config
    }

    /// Issue a thread handle for the calling host thread.
    ///
    /// This is the bootstrap thread of a simulated process.
    pub fn register_current_thread(&self) -> Handle {
        let mut state = self.lock();
        let id = state.next_id();
        state.threads.insert(
            id,
            ThreadObject {
                entry: None,
                argument: 0,
                priority: self.shared.config.default_priority,
                started: true,
                exited: false,
            },
        );
        let handle = state.insert_handle(Object::Thread(id));
        CURRENT_THREAD.with(|current| current.set(handle.raw()));
        handle
    }

    /// Make the next `count` calls of `call` fail with `code`.
    pub fn inject_fault(&self, call: Syscall, code: ResultCode, count: usize) {
        if count == 0 {
            return;
        }
        self.lock().faults.push(Fault { call, code, remaining: count });
    }

    /// Everything written to the debug channel so far
    pub fn debug_output(&self) -> String {
        self.lock().debug_output.clone()
    }

    pub fn open_handle_count(&self) -> usize {
        self.lock().handles.len()
    }

    pub fn live_thread_count(&self) -> usize {
        self.lock().live_threads()
    }

    /// Number of regions currently mapped into the stack region
    pub fn mapped_region_count(&self) -> usize {
        self.lock().regions.len()
    }

    fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn block<'a>(
        &'a self,
        guard: MutexGuard<'a, KernelState>,
        deadline: Option<Instant>,
    ) -> MutexGuard<'a, KernelState> {
        match deadline {
            None => self.shared.wakeup.wait(guard).unwrap_or_else(PoisonError::into_inner),
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                self.shared
                    .wakeup
                    .wait_timeout(guard, timeout)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        }
    }

    fn wake_all(&self) {
        self.shared.wakeup.notify_all();
    }

    fn in_stack_region(&self, address: usize, size: usize) -> bool {
        let config = &self.shared.config;
        let end = config.stack_region_base + config.stack_region_size;
        address >= config.stack_region_base && address.checked_add(size).map_or(false, |last| last <= end)
    }
}

/// Marks a simulated thread exited once its host thread leaves the entry,
/// including by unwinding.
struct ExitNotifier {
    kernel: HostKernel,
    object: u64,
}

impl Drop for ExitNotifier {
    fn drop(&mut self) {
        let mut state = self.kernel.lock();
        if let Some(thread) = state.threads.get_mut(&self.object) {
            thread.exited = true;
        }
        drop(state);
        self.kernel.wake_all();
    }
}

impl Svc for HostKernel {
    fn create_thread(
        &self,
        entry: KernelThreadEntry,
        argument: usize,
        stack_top: usize,
        priority: i32,
        core_id: i32,
    ) -> SvcResult<Handle> {
        let mut state = self.lock();
        state.take_fault(Syscall::CreateThread)?;

        if !(HIGHEST_THREAD_PRIORITY..=LOWEST_THREAD_PRIORITY).contains(&priority) {
            return Err(kernel::INVALID_PRIORITY);
        }
        if core_id != DEFAULT_CORE_ID && !(0..=MAX_CORE_ID).contains(&core_id) {
            return Err(kernel::INVALID_CORE_ID);
        }
        if state.live_threads() >= self.shared.config.max_threads {
            return Err(kernel::OUT_OF_RESOURCE);
        }
        if stack_top == 0 || state.mapped_region(stack_top - 1).is_none() {
            return Err(kernel::INVALID_CURRENT_MEMORY);
        }

        let id = state.next_id();
        state.threads.insert(
            id,
            ThreadObject { entry: Some(entry), argument, priority, started: false, exited: false },
        );
        let handle = state.insert_handle(Object::Thread(id));
        log_trace!("host kernel: created thread {:?} (priority {:#x})", handle, priority);
        Ok(handle)
    }

    fn start_thread(&self, thread: Handle) -> SvcResult {
        let mut state = self.lock();
        state.take_fault(Syscall::StartThread)?;

        let Object::Thread(id) = state.object(thread)? else {
            return Err(kernel::INVALID_HANDLE);
        };
        let Some(object) = state.threads.get_mut(&id) else {
            return Err(kernel::INVALID_HANDLE);
        };
        if object.started {
            return Ok(());
        }
        let Some(entry) = object.entry.take() else {
            return Err(kernel::INVALID_STATE);
        };
        let argument = object.argument;
        object.started = true;
        drop(state);

        let notifier = ExitNotifier { kernel: self.clone(), object: id };
        let handle = thread.raw();
        std::thread::Builder::new()
            .name(format!("rt-thread-{:#x}", handle))
            .spawn(move || {
                let _notifier = notifier;
                CURRENT_THREAD.with(|current| current.set(handle));
                entry(argument);
            })
            .map(|_| ())
            .map_err(|_| kernel::OUT_OF_RESOURCE)
    }

    fn exit_thread(&self) {
        log_trace!("host kernel: thread {:#x} exiting", CURRENT_THREAD.with(Cell::get));
    }

    fn sleep_thread(&self, nanoseconds: i64) {
        if nanoseconds <= 0 {
            std::thread::yield_now();
        } else {
            std::thread::sleep(Duration::from_nanos(nanoseconds as u64));
        }
    }

    fn get_thread_priority(&self, thread: Handle) -> SvcResult<i32> {
        let mut state = self.lock();
        state.take_fault(Syscall::GetThreadPriority)?;
        Ok(state.thread(thread)?.priority)
    }

    fn set_thread_priority(&self, thread: Handle, priority: i32) -> SvcResult {
        let mut state = self.lock();
        state.take_fault(Syscall::SetThreadPriority)?;
        if !(HIGHEST_THREAD_PRIORITY..=LOWEST_THREAD_PRIORITY).contains(&priority) {
            return Err(kernel::INVALID_PRIORITY);
        }
        state.thread(thread)?.priority = priority;
        Ok(())
    }

    fn wait_synchronization(&self, handles: &[Handle], timeout: i64) -> SvcResult<usize> {
        let mut state = self.lock();
        state.take_fault(Syscall::WaitSynchronization)?;
        if handles.len() > MAX_WAIT_HANDLES {
            return Err(kernel::OUT_OF_RANGE);
        }

        let deadline = deadline(timeout);
        loop {
            for (index, handle) in handles.iter().enumerate() {
                if state.is_signaled(*handle)? {
                    return Ok(index);
                }
            }
            if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                return Err(kernel::TIMED_OUT);
            }
            state = self.block(state, deadline);
        }
    }

    unsafe fn arbitrate_lock(&self, owner: Handle, address: usize, requester: Handle) -> SvcResult {
        let mut state = self.lock();
        state.take_fault(Syscall::ArbitrateLock)?;

        let word = lock_word(address);
        if word.load(Ordering::SeqCst) != owner.raw() | LOCK_HAS_LISTENERS {
            return Ok(());
        }
        state.object(owner)?;

        let id = state.next_id();
        state.lock_waiters.push(LockWaiter { id, address, tag: requester.raw() });
        while !state.granted.remove(&id) {
            state = self.block(state, None);
        }
        Ok(())
    }

    unsafe fn arbitrate_unlock(&self, address: usize) -> SvcResult {
        let mut state = self.lock();
        state.take_fault(Syscall::ArbitrateUnlock)?;
        state.release_lock(address);
        drop(state);
        self.wake_all();
        Ok(())
    }

    unsafe fn wait_process_wide_key_atomic(
        &self,
        mutex_address: usize,
        key: usize,
        requester: Handle,
        timeout: i64,
    ) -> SvcResult {
        let mut state = self.lock();
        state.take_fault(Syscall::WaitProcessWideKeyAtomic)?;

        state.release_lock(mutex_address);
        let id = state.next_id();
        state.key_waiters.push(KeyWaiter { id, key, mutex_address, tag: requester.raw() });
        self.wake_all();

        let deadline = deadline(timeout);
        loop {
            if state.granted.remove(&id) {
                return Ok(());
            }
            // Once signaled the waiter sits in the lock queue and no longer
            // times out.
            let queued = state.key_waiters.iter().position(|waiter| waiter.id == id);
            if let (Some(index), Some(deadline)) = (queued, deadline) {
                if Instant::now() >= deadline {
                    state.key_waiters.remove(index);
                    return Err(kernel::TIMED_OUT);
                }
            }
            state = self.block(state, if queued.is_some() { deadline } else { None });
        }
    }

    fn signal_process_wide_key(&self, key: usize, count: i32) {
        let mut state = self.lock();
        let limit = if count > 0 { count as usize } else { usize::MAX };

        let mut woken = 0;
        while woken < limit {
            let Some(index) = state.key_waiters.iter().position(|waiter| waiter.key == key) else {
                break;
            };
            let waiter = state.key_waiters.remove(index);
            woken += 1;

            // SAFETY: the waiter is still blocked in
            // `wait_process_wide_key_atomic`, whose caller keeps the lock
            // word alive until that call returns.
            let word = unsafe { lock_word(waiter.mutex_address) };
            loop {
                let current = word.load(Ordering::SeqCst);
                if current == 0 {
                    if word.compare_exchange(0, waiter.tag, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
                        state.granted.insert(waiter.id);
                        break;
                    }
                } else if word
                    .compare_exchange(current, current | LOCK_HAS_LISTENERS, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    state.lock_waiters.push(LockWaiter {
                        id: waiter.id,
                        address: waiter.mutex_address,
                        tag: waiter.tag,
                    });
                    break;
                }
            }
        }
        drop(state);
        if woken > 0 {
            self.wake_all();
        }
    }

    fn create_event(&self) -> SvcResult<(Handle, Handle)> {
        let mut state = self.lock();
        state.take_fault(Syscall::CreateEvent)?;
        let id = state.next_id();
        state.events.insert(id, EventObject { signaled: false });
        let writable = state.insert_handle(Object::WritableEvent(id));
        let readable = state.insert_handle(Object::ReadableEvent(id));
        Ok((writable, readable))
    }

    fn signal_event(&self, event: Handle) -> SvcResult {
        let mut state = self.lock();
        state.take_fault(Syscall::SignalEvent)?;
        let Object::WritableEvent(id) = state.object(event)? else {
            return Err(kernel::INVALID_HANDLE);
        };
        if let Some(event) = state.events.get_mut(&id) {
            event.signaled = true;
        }
        drop(state);
        self.wake_all();
        Ok(())
    }

    fn clear_event(&self, event: Handle) -> SvcResult {
        let mut state = self.lock();
        state.take_fault(Syscall::ClearEvent)?;
        let (Object::ReadableEvent(id) | Object::WritableEvent(id)) = state.object(event)? else {
            return Err(kernel::INVALID_HANDLE);
        };
        if let Some(event) = state.events.get_mut(&id) {
            event.signaled = false;
        }
        Ok(())
    }

    fn reset_signal(&self, event: Handle) -> SvcResult {
        let mut state = self.lock();
        state.take_fault(Syscall::ResetSignal)?;
        let Object::ReadableEvent(id) = state.object(event)? else {
            return Err(kernel::INVALID_HANDLE);
        };
        match state.events.get_mut(&id) {
            Some(event) if event.signaled => {
                event.signaled = false;
                Ok(())
            }
            _ => Err(kernel::INVALID_STATE),
        }
    }

    fn map_memory(&self, destination: usize, source: usize, size: usize) -> SvcResult {
        let mut state = self.lock();
        state.take_fault(Syscall::MapMemory)?;

        if size == 0 || size % PAGE_SIZE != 0 {
            return Err(kernel::INVALID_SIZE);
        }
        if destination % PAGE_SIZE != 0 || source == 0 {
            return Err(kernel::INVALID_ADDRESS);
        }
        if !self.in_stack_region(destination, size) {
            return Err(kernel::INVALID_MEMORY_REGION);
        }
        let end = destination + size;
        let overlaps = state
            .regions
            .range(..end)
            .next_back()
            .map_or(false, |(start, region)| start + region.size > destination);
        if overlaps {
            return Err(kernel::INVALID_CURRENT_MEMORY);
        }

        state.regions.insert(destination, MappedRegion { size, source });
        log_trace!("host kernel: mapped {:#x} -> {:#x} ({:#x} bytes)", source, destination, size);
        Ok(())
    }

    fn unmap_memory(&self, destination: usize, source: usize, size: usize) -> SvcResult {
        let mut state = self.lock();
        state.take_fault(Syscall::UnmapMemory)?;

        match state.regions.get(&destination) {
            Some(region) if region.size == size && region.source == source => {
                state.regions.remove(&destination);
                Ok(())
            }
            _ => Err(kernel::INVALID_CURRENT_MEMORY),
        }
    }

    fn query_memory(&self, address: usize) -> SvcResult<MemoryInfo> {
        let mut state = self.lock();
        state.take_fault(Syscall::QueryMemory)?;

        let config = &self.shared.config;
        let space_end = config.address_space_base + config.address_space_size;
        let mut info = MemoryInfo {
            address: 0,
            size: 0,
            state: MemoryState::Free,
            attribute: MemoryAttribute::empty(),
            permission: MemoryPermission::empty(),
            ipc_ref_count: 0,
            device_ref_count: 0,
        };

        if address < config.address_space_base {
            info.size = config.address_space_base;
            info.state = MemoryState::Inaccessible;
        } else if address >= space_end {
            info.address = space_end;
            info.size = usize::MAX - space_end + 1;
            info.state = MemoryState::Inaccessible;
        } else if let Some((start, region)) = state.mapped_region(address) {
            info.address = start;
            info.size = region.size;
            info.state = MemoryState::Stack;
            info.permission = MemoryPermission::READ_WRITE;
        } else {
            let lower = state
                .regions
                .range(..=address)
                .next_back()
                .map_or(config.address_space_base, |(start, region)| start + region.size);
            let upper = state.regions.range(address + 1..).next().map_or(space_end, |(start, _)| *start);
            info.address = lower;
            info.size = upper - lower;
        }
        Ok(info)
    }

    fn get_info(&self, info: InfoType, handle: Handle, _subtype: u64) -> SvcResult<u64> {
        let mut state = self.lock();
        state.take_fault(Syscall::GetInfo)?;
        if handle != Handle::CURRENT_PROCESS {
            return Err(kernel::INVALID_HANDLE);
        }

        let config = &self.shared.config;
        let value = match info {
            InfoType::AddressSpaceBaseAddr => config.address_space_base,
            InfoType::AddressSpaceSize => config.address_space_size,
            InfoType::StackRegionBaseAddr => config.stack_region_base,
            InfoType::StackRegionSize => config.stack_region_size,
            _ => return Err(kernel::INVALID_ENUM_VALUE),
        };
        Ok(value as u64)
    }

    fn close_handle(&self, handle: Handle) -> SvcResult {
        if handle.is_pseudo() {
            return Ok(());
        }
        let mut state = self.lock();
        state.take_fault(Syscall::CloseHandle)?;
        state.handles.remove(&handle.raw()).map(|_| ()).ok_or(kernel::INVALID_HANDLE)
    }

    fn output_debug_string(&self, message: &str) -> SvcResult {
        self.lock().debug_output.push_str(message);
        Ok(())
    }

    fn break_execution(&self, reason: BreakReason, info: &[u8]) -> ! {
        log_debug!("host kernel: break requested ({:?})", reason);
        panic!("kernel break ({:?}): {}", reason, String::from_utf8_lossy(info));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_entry(_argument: usize) {}

    #[test]
    fn test_event_signal_and_reset() {
        let kernel = HostKernel::new();
        let (writable, readable) = kernel.create_event().unwrap();

        assert_eq!(kernel.reset_signal(readable), Err(kernel::INVALID_STATE));
        kernel.signal_event(writable).unwrap();
        assert_eq!(kernel.wait_synchronization(&[readable], 0), Ok(0));
        assert_eq!(kernel.reset_signal(readable), Ok(()));
        assert_eq!(kernel.wait_synchronization(&[readable], 0), Err(kernel::TIMED_OUT));

        // Only the writable side can signal.
        assert_eq!(kernel.signal_event(readable), Err(kernel::INVALID_HANDLE));
    }

    #[test]
    fn test_close_handle_twice() {
        let kernel = HostKernel::new();
        let (writable, readable) = kernel.create_event().unwrap();
        assert_eq!(kernel.open_handle_count(), 2);
        kernel.close_handle(writable).unwrap();
        assert_eq!(kernel.close_handle(writable), Err(kernel::INVALID_HANDLE));
        kernel.close_handle(readable).unwrap();
        assert_eq!(kernel.open_handle_count(), 0);
    }

    #[test]
    fn test_query_memory_reports_gaps() {
        let kernel = HostKernel::new();
        let base = kernel.config().stack_region_base;

        kernel.map_memory(base + 0x4000, 0x1234_0000, 0x2000).unwrap();

        let free = kernel.query_memory(base).unwrap();
        assert_eq!(free.state, MemoryState::Free);
        assert_eq!(free.end(), base + 0x4000);

        let mapped = kernel.query_memory(base + 0x5000).unwrap();
        assert_eq!(mapped.state, MemoryState::Stack);
        assert_eq!(mapped.address, base + 0x4000);
        assert_eq!(mapped.size, 0x2000);

        let after = kernel.query_memory(base + 0x6000).unwrap();
        assert_eq!(after.state, MemoryState::Free);
        assert_eq!(after.address, base + 0x6000);

        assert_eq!(
            kernel.map_memory(base + 0x5000, 0x1234_0000, 0x1000),
            Err(kernel::INVALID_CURRENT_MEMORY)
        );
        assert_eq!(
            kernel.unmap_memory(base + 0x4000, 0x1234_0000, 0x1000),
            Err(kernel::INVALID_CURRENT_MEMORY)
        );
        kernel.unmap_memory(base + 0x4000, 0x1234_0000, 0x2000).unwrap();
        assert_eq!(kernel.mapped_region_count(), 0);
    }

    #[test]
    fn test_create_thread_validation() {
        let kernel = HostKernel::new();
        let base = kernel.config().stack_region_base;

        // No mapped stack yet.
        assert_eq!(
            kernel.create_thread(noop_entry, 0, base + 0x1000, 0x2C, DEFAULT_CORE_ID),
            Err(kernel::INVALID_CURRENT_MEMORY)
        );

        kernel.map_memory(base, 0x2000_0000, 0x1000).unwrap();
        assert_eq!(
            kernel.create_thread(noop_entry, 0, base + 0x1000, 0x40, DEFAULT_CORE_ID),
            Err(kernel::INVALID_PRIORITY)
        );
        assert_eq!(
            kernel.create_thread(noop_entry, 0, base + 0x1000, 0x2C, 4),
            Err(kernel::INVALID_CORE_ID)
        );

        let thread = kernel.create_thread(noop_entry, 0, base + 0x1000, 0x2C, 0).unwrap();
        assert_eq!(kernel.wait_synchronization(&[thread], 0), Err(kernel::TIMED_OUT));
        kernel.start_thread(thread).unwrap();
        kernel.start_thread(thread).unwrap();
        assert_eq!(kernel.wait_synchronization(&[thread], crate::svc::WAIT_FOREVER), Ok(0));
        kernel.close_handle(thread).unwrap();
    }

    #[test]
    fn test_injected_faults_run_out() {
        let kernel = HostKernel::new();
        kernel.inject_fault(Syscall::CreateEvent, kernel::OUT_OF_RESOURCE, 2);

        assert_eq!(kernel.create_event(), Err(kernel::OUT_OF_RESOURCE));
        assert_eq!(kernel.create_event(), Err(kernel::OUT_OF_RESOURCE));
        assert!(kernel.create_event().is_ok());
    }

    #[test]
    fn test_arbitrate_lock_returns_when_word_changed() {
        let kernel = HostKernel::new();
        let owner = kernel.register_current_thread();
        let word = AtomicU32::new(owner.raw());

        // No listener bit: nothing to wait for.
        let result = unsafe {
            kernel.arbitrate_lock(owner, &word as *const AtomicU32 as usize, Handle::from_raw(0x999))
        };
        assert_eq!(result, Ok(()));

        word.store(owner.raw() | LOCK_HAS_LISTENERS, Ordering::SeqCst);
        unsafe { kernel.arbitrate_unlock(&word as *const AtomicU32 as usize) }.unwrap();
        assert_eq!(word.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_get_info_requires_process_handle() {
        let kernel = HostKernel::new();
        let base = kernel.get_info(InfoType::StackRegionBaseAddr, Handle::CURRENT_PROCESS, 0);
        assert_eq!(base, Ok(kernel.config().stack_region_base as u64));
        assert_eq!(
            kernel.get_info(InfoType::StackRegionSize, Handle::from_raw(0x100), 0),
            Err(kernel::INVALID_HANDLE)
        );
    }
}
