// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Barrier
//!
//! Holds threads back until a fixed number of them have arrived.
//!
//! The arrival count is never reset: once released, a barrier stays open
//! and later arrivals return immediately. A barrier serves one round.
//!
//! Only arrivals before the release block; an arrival past
//! `number_to_wait` passes straight through.

use crate::os::condvar_impl::ConditionVariableImpl;
use crate::os::critical_section::Guarded;
use crate::os::ObjectState;

#[derive(Debug)]
struct Arrivals {
    arrive_count: u64,
    number_to_wait: u64,
}

#[derive(Debug)]
pub struct Barrier {
    state: ObjectState,
    arrivals: Guarded<Arrivals>,
    condition_variable: ConditionVariableImpl,
}

impl Barrier {
    /// Create a barrier released by the `number_to_wait`th arrival.
    pub fn new(number_to_wait: u64) -> Self {
        crate::rt_assert!(number_to_wait > 0, "a barrier must wait for at least one thread");
        Self {
            state: ObjectState::Initialized,
            arrivals: Guarded::new(Arrivals { arrive_count: 0, number_to_wait }),
            condition_variable: ConditionVariableImpl::new(),
        }
    }

    pub const fn uninitialized() -> Self {
        Self {
            state: ObjectState::Uninitialized,
            arrivals: Guarded::new(Arrivals { arrive_count: 0, number_to_wait: 0 }),
            condition_variable: ConditionVariableImpl::new(),
        }
    }

    pub fn initialize(&mut self, number_to_wait: u64) {
        crate::rt_assert!(self.state == ObjectState::Uninitialized, "barrier initialized twice");
        *self = Self::new(number_to_wait);
    }

    pub fn finalize(&mut self) {
        crate::rt_assert!(self.state == ObjectState::Initialized, "barrier is not initialized");
        self.state = ObjectState::Uninitialized;
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ObjectState::Initialized
    }

    /// Number of threads that have arrived so far
    pub fn arrive_count(&self) -> u64 {
        self.arrivals.lock().arrive_count
    }

    /// Arrive and block until `number_to_wait` threads have arrived.
    pub fn wait(&self) {
        crate::rt_assert!(self.state == ObjectState::Initialized, "barrier is not initialized");
        let mut arrivals = self.arrivals.lock();
        arrivals.arrive_count += 1;
        if arrivals.arrive_count == arrivals.number_to_wait {
            self.condition_variable.broadcast();
            return;
        }
        while arrivals.arrive_count < arrivals.number_to_wait {
            arrivals.wait(&self.condition_variable);
        }
    }
}
