// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Condition Variable
//!
//! Application-facing condition variable paired with a held [`Mutex`].

use crate::os::condvar_impl::ConditionVariableImpl;
use crate::os::mutex::Mutex;
use crate::os::ObjectState;

/// Outcome of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionVariableStatus {
    TimedOut,
    NoTimeOut,
}

#[derive(Debug)]
pub struct ConditionVariable {
    state: ObjectState,
    condition_variable: ConditionVariableImpl,
}

impl ConditionVariable {
    pub const fn new() -> Self {
        Self { state: ObjectState::Initialized, condition_variable: ConditionVariableImpl::new() }
    }

    pub const fn uninitialized() -> Self {
        Self { state: ObjectState::Uninitialized, condition_variable: ConditionVariableImpl::new() }
    }

    pub fn initialize(&mut self) {
        crate::rt_assert!(self.state == ObjectState::Uninitialized, "condition variable initialized twice");
        *self = Self::new();
    }

    pub fn finalize(&mut self) {
        self.assert_initialized();
        self.state = ObjectState::Uninitialized;
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ObjectState::Initialized
    }

    fn assert_initialized(&self) {
        crate::rt_assert!(self.state == ObjectState::Initialized, "condition variable is not initialized");
    }

    pub fn signal(&self) {
        self.assert_initialized();
        self.condition_variable.signal();
    }

    pub fn broadcast(&self) {
        self.assert_initialized();
        self.condition_variable.broadcast();
    }

    /// Release `mutex`, wait for a signal, and hold `mutex` again.
    ///
    /// The caller must hold `mutex`; a recursive mutex keeps its nesting
    /// depth across the wait.
    pub fn wait(&self, mutex: &Mutex) {
        self.assert_initialized();
        let counter = mutex.suspend_ownership();
        self.condition_variable.wait(mutex.critical_section());
        mutex.resume_ownership(counter);
    }

    /// Like [`ConditionVariable::wait`], giving up after `timeout`
    /// nanoseconds. `mutex` is held again on return either way.
    pub fn wait_timeout(&self, mutex: &Mutex, timeout: i64) -> ConditionVariableStatus {
        self.assert_initialized();
        let counter = mutex.suspend_ownership();
        let signaled = self.condition_variable.wait_timeout(mutex.critical_section(), timeout);
        mutex.resume_ownership(counter);
        if signaled {
            ConditionVariableStatus::NoTimeOut
        } else {
            ConditionVariableStatus::TimedOut
        }
    }
}

impl Default for ConditionVariable {
    fn default() -> Self {
        Self::new()
    }
}
