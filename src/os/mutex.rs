// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Mutex
//!
//! A [`CriticalSection`] plus the bookkeeping needed for recursion. The
//! owner field lets the holder skip the section on nested locks; the
//! counter tracks nested holds of a recursive mutex.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mutex = Mutex::new(true);
//! mutex.lock();
//! mutex.lock();
//! mutex.unlock();
//! mutex.unlock();
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use crate::os::critical_section::CriticalSection;
use crate::os::{tls, ObjectState};
use crate::svc::Handle;

/// A lock, optionally recursive
#[derive(Debug)]
pub struct Mutex {
    state: ObjectState,
    is_recursive: bool,
    // Only meaningful while the critical section is held; other threads
    // may read a stale value but never their own handle.
    owner: AtomicU32,
    counter: AtomicU32,
    critical_section: CriticalSection,
}

impl Mutex {
    /// Create an initialized mutex.
    pub const fn new(is_recursive: bool) -> Self {
        Self {
            state: ObjectState::Initialized,
            is_recursive,
            owner: AtomicU32::new(Handle::INVALID.raw()),
            counter: AtomicU32::new(0),
            critical_section: CriticalSection::new(),
        }
    }

    /// Create a mutex that must be initialized before use.
    pub const fn uninitialized() -> Self {
        let mut mutex = Self::new(false);
        mutex.state = ObjectState::Uninitialized;
        mutex
    }

    pub fn initialize(&mut self, is_recursive: bool) {
        crate::rt_assert!(self.state == ObjectState::Uninitialized, "mutex initialized twice");
        *self = Self::new(is_recursive);
    }

    pub fn finalize(&mut self) {
        crate::rt_assert!(self.state == ObjectState::Initialized, "mutex is not initialized");
        crate::rt_assert!(!self.critical_section.is_locked(), "mutex finalized while locked");
        self.state = ObjectState::Uninitialized;
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ObjectState::Initialized
    }

    pub fn is_recursive(&self) -> bool {
        self.is_recursive
    }

    fn owner(&self) -> Handle {
        Handle::from_raw(self.owner.load(Ordering::Relaxed))
    }

    fn assert_initialized(&self) {
        crate::rt_assert!(self.state == ObjectState::Initialized, "mutex is not initialized");
    }

    /// Acquire the mutex, blocking while another thread holds it.
    pub fn lock(&self) {
        self.assert_initialized();
        let current = tls::current_thread_handle();
        if self.owner() != current {
            self.critical_section.enter();
            self.owner.store(current.raw(), Ordering::Relaxed);
        }
        if self.is_recursive {
            self.counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Acquire the mutex if no other thread holds it.
    pub fn try_lock(&self) -> bool {
        self.assert_initialized();
        let current = tls::current_thread_handle();
        if self.owner() != current {
            if !self.critical_section.try_enter() {
                return false;
            }
            self.owner.store(current.raw(), Ordering::Relaxed);
        }
        if self.is_recursive {
            self.counter.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Release one hold. A recursive mutex is released on its last unlock.
    pub fn unlock(&self) {
        self.assert_initialized();
        crate::rt_assert!(
            self.owner() == tls::current_thread_handle(),
            "mutex unlocked by a thread that does not hold it"
        );
        if self.is_recursive && self.counter.fetch_sub(1, Ordering::Relaxed) > 1 {
            return;
        }
        self.owner.store(Handle::INVALID.raw(), Ordering::Relaxed);
        self.critical_section.leave();
    }

    /// Lock and get a guard that unlocks on drop
    pub fn lock_guard(&self) -> MutexGuard<'_> {
        self.lock();
        MutexGuard { mutex: self }
    }

    pub fn is_locked_by_current_thread(&self) -> bool {
        self.is_initialized() && self.owner() == tls::current_thread_handle()
    }

    pub(crate) fn critical_section(&self) -> &CriticalSection {
        &self.critical_section
    }

    /// Give up ownership bookkeeping before a condition wait releases the
    /// section; returns the nesting count to restore afterwards.
    pub(crate) fn suspend_ownership(&self) -> u32 {
        crate::rt_assert!(
            self.is_locked_by_current_thread(),
            "condition wait on a mutex the caller does not hold"
        );
        self.owner.store(Handle::INVALID.raw(), Ordering::Relaxed);
        self.counter.swap(0, Ordering::Relaxed)
    }

    /// Take ownership back once the section is held again.
    pub(crate) fn resume_ownership(&self, counter: u32) {
        self.owner.store(tls::current_thread_handle().raw(), Ordering::Relaxed);
        self.counter.store(counter, Ordering::Relaxed);
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Holds a [`Mutex`] until dropped
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl MutexGuard<'_> {
    pub fn mutex(&self) -> &Mutex {
        self.mutex
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
