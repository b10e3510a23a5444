// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! User Event
//!
//! An in-process event: a flag under a critical section plus a condition
//! variable to sleep on. Auto-clear events reset the flag for exactly one
//! observer per signal.
//!
//! # Design
//!
//! - **Auto-clear**: a signal wakes one waiter; the waiter (or a poll)
//!   that observes the flag clears it
//! - **Manual clear**: a signal wakes every waiter and the flag stays set
//!   until [`UserEvent::clear`]
//! - Signaling an already signaled event wakes nobody

use crate::os::condvar_impl::ConditionVariableImpl;
use crate::os::critical_section::Guarded;
use crate::os::ObjectState;

#[derive(Debug, Default)]
struct EventFlags {
    is_signaled_at_init: bool,
    is_signaled: bool,
    is_auto_clear: bool,
}

#[derive(Debug)]
pub struct UserEvent {
    state: ObjectState,
    flags: Guarded<EventFlags>,
    condition_variable: ConditionVariableImpl,
}

impl UserEvent {
    /// Create an initialized event.
    pub const fn new(is_signaled_at_init: bool, is_auto_clear: bool) -> Self {
        Self {
            state: ObjectState::Initialized,
            flags: Guarded::new(EventFlags {
                is_signaled_at_init,
                is_signaled: is_signaled_at_init,
                is_auto_clear,
            }),
            condition_variable: ConditionVariableImpl::new(),
        }
    }

    pub const fn uninitialized() -> Self {
        let mut event = Self::new(false, false);
        event.state = ObjectState::Uninitialized;
        event
    }

    pub fn initialize(&mut self, is_signaled_at_init: bool, is_auto_clear: bool) {
        crate::rt_assert!(self.state == ObjectState::Uninitialized, "user event initialized twice");
        *self = Self::new(is_signaled_at_init, is_auto_clear);
    }

    pub fn finalize(&mut self) {
        self.assert_initialized();
        self.state = ObjectState::Uninitialized;
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ObjectState::Initialized
    }

    /// Whether the event started out signaled
    pub fn was_signaled_at_init(&self) -> bool {
        self.assert_initialized();
        self.flags.lock().is_signaled_at_init
    }

    fn assert_initialized(&self) {
        crate::rt_assert!(self.state == ObjectState::Initialized, "user event is not initialized");
    }

    /// Block until the event is signaled.
    pub fn wait(&self) {
        self.assert_initialized();
        let mut flags = self.flags.lock();
        while !flags.is_signaled {
            flags.wait(&self.condition_variable);
        }
        if flags.is_auto_clear {
            flags.is_signaled = false;
        }
    }

    /// Poll the event without blocking.
    ///
    /// Observing an auto-clear event signaled clears it.
    pub fn is_signaled(&self) -> bool {
        self.assert_initialized();
        let mut flags = self.flags.lock();
        let signaled = flags.is_signaled;
        if flags.is_auto_clear {
            flags.is_signaled = false;
        }
        signaled
    }

    pub fn signal(&self) {
        self.assert_initialized();
        let mut flags = self.flags.lock();
        if flags.is_signaled {
            return;
        }
        flags.is_signaled = true;
        if flags.is_auto_clear {
            self.condition_variable.signal();
        } else {
            self.condition_variable.broadcast();
        }
    }

    pub fn clear(&self) {
        self.assert_initialized();
        self.flags.lock().is_signaled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::Harness;

    #[test]
    fn test_auto_clear_is_observed_once() {
        let _harness = Harness::new();
        let event = UserEvent::new(false, true);

        assert!(!event.is_signaled());
        event.signal();
        assert!(event.is_signaled());
        assert!(!event.is_signaled());

        event.signal();
        event.wait();
        assert!(!event.is_signaled());
    }

    #[test]
    fn test_manual_clear_stays_signaled() {
        let _harness = Harness::new();
        let event = UserEvent::new(false, false);

        event.signal();
        event.wait();
        assert!(event.is_signaled());
        assert!(event.is_signaled());
        event.clear();
        assert!(!event.is_signaled());
    }

    #[test]
    fn test_signaled_at_init() {
        let _harness = Harness::new();
        let event = UserEvent::new(true, false);
        assert!(event.was_signaled_at_init());
        event.wait();
        assert!(event.is_signaled());
    }

    #[test]
    fn test_lifecycle() {
        let _harness = Harness::new();
        let mut event = UserEvent::uninitialized();
        assert!(!event.is_initialized());
        event.initialize(false, true);
        event.signal();
        event.finalize();
        assert!(!event.is_initialized());
    }
}
