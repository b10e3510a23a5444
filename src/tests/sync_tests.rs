// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Synchronization Tests
//!
//! The primitives under real contention between runtime threads.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use super::*;
use crate::os::barrier::Barrier;
use crate::os::condvar::{ConditionVariable, ConditionVariableStatus};
use crate::os::critical_section::CriticalSection;
use crate::os::kernel_event::KernelEvent;
use crate::os::mutex::Mutex;
use crate::os::thread::{sleep_thread, yield_thread};
use crate::os::user_event::UserEvent;
use crate::svc::Handle;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Spawn and start one thread per stack, all running `entry(argument)`.
fn start_all(
    harness: &Harness,
    entry: ThreadEntrypoint,
    argument: *mut u8,
    stacks: &mut [TestStack],
) -> Vec<Thread> {
    let threads: Vec<Thread> =
        stacks.iter_mut().map(|stack| create_thread(harness, entry, argument, stack)).collect();
    for thread in &threads {
        thread.start();
    }
    threads
}

fn join_all(threads: Vec<Thread>) {
    for thread in threads {
        thread.wait();
        thread.destroy();
    }
}

fn stacks(count: usize) -> Vec<TestStack> {
    (0..count).map(|_| TestStack::new()).collect()
}

/// ============================================================================
/// Critical Section
/// ============================================================================

const CONTENDERS: usize = 6;
const ROUNDS: u32 = 200;

#[derive(Default)]
struct Contention {
    section: CriticalSection,
    inside: AtomicU32,
    most_inside: AtomicU32,
    counter: AtomicU32,
}

fn contender(argument: *mut u8) {
    // SAFETY: the test keeps the state alive until the threads are gone.
    let contention = unsafe { shared::<Contention>(argument) };
    for round in 0..ROUNDS {
        contention.section.enter();
        let inside = contention.inside.fetch_add(1, Ordering::SeqCst) + 1;
        contention.most_inside.fetch_max(inside, Ordering::SeqCst);

        // A split read-modify-write loses updates unless excluded.
        let value = contention.counter.load(Ordering::Relaxed);
        if round % 16 == 0 {
            yield_thread();
        }
        contention.counter.store(value + 1, Ordering::Relaxed);

        contention.inside.fetch_sub(1, Ordering::SeqCst);
        contention.section.leave();
    }
}

#[test]
fn test_critical_section_mutual_exclusion() {
    let harness = Harness::new();
    let contention = Contention::default();
    let mut stacks = stacks(CONTENDERS);

    let threads = start_all(&harness, contender, argument_of(&contention), &mut stacks);
    join_all(threads);

    assert_eq!(contention.most_inside.load(Ordering::SeqCst), 1);
    assert_eq!(contention.counter.load(Ordering::SeqCst), CONTENDERS as u32 * ROUNDS);
    assert!(!contention.section.is_locked());
}

/// ============================================================================
/// Mutex
/// ============================================================================

struct TryLockScenario {
    mutex: Mutex,
    attempt: UserEvent,
    attempted: UserEvent,
    first: AtomicBool,
    second: AtomicBool,
}

fn try_locker(argument: *mut u8) {
    // SAFETY: the test keeps the scenario alive until the thread is gone.
    let scenario = unsafe { shared::<TryLockScenario>(argument) };

    scenario.attempt.wait();
    scenario.first.store(scenario.mutex.try_lock(), Ordering::SeqCst);
    scenario.attempted.signal();

    scenario.attempt.wait();
    let acquired = scenario.mutex.try_lock();
    scenario.second.store(acquired, Ordering::SeqCst);
    if acquired {
        scenario.mutex.unlock();
    }
    scenario.attempted.signal();
}

#[test]
fn test_mutex_try_lock_while_held_elsewhere() {
    let harness = Harness::new();
    let mut mutex = Mutex::uninitialized();
    mutex.initialize(false);
    let scenario = TryLockScenario {
        mutex,
        attempt: UserEvent::new(false, true),
        attempted: UserEvent::new(false, true),
        first: AtomicBool::new(true),
        second: AtomicBool::new(false),
    };
    let mut stack = TestStack::new();
    let thread = create_thread(&harness, try_locker, argument_of(&scenario), &mut stack);
    thread.start();

    scenario.mutex.lock();
    scenario.attempt.signal();
    scenario.attempted.wait();
    assert!(!scenario.first.load(Ordering::SeqCst));

    scenario.mutex.unlock();
    scenario.attempt.signal();
    scenario.attempted.wait();
    assert!(scenario.second.load(Ordering::SeqCst));

    thread.wait();
    assert!(!scenario.mutex.is_locked_by_current_thread());
}

struct RecursiveScenario {
    mutex: Mutex,
    probe: UserEvent,
    probed: UserEvent,
    acquired: AtomicBool,
}

fn recursive_prober(argument: *mut u8) {
    // SAFETY: the test keeps the scenario alive until the thread is gone.
    let scenario = unsafe { shared::<RecursiveScenario>(argument) };
    for _ in 0..3 {
        scenario.probe.wait();
        let acquired = scenario.mutex.try_lock();
        if acquired {
            scenario.mutex.unlock();
        }
        scenario.acquired.store(acquired, Ordering::SeqCst);
        scenario.probed.signal();
    }
}

#[test]
fn test_recursive_mutex_held_until_last_unlock() {
    let harness = Harness::new();
    let scenario = RecursiveScenario {
        mutex: Mutex::new(true),
        probe: UserEvent::new(false, true),
        probed: UserEvent::new(false, true),
        acquired: AtomicBool::new(false),
    };
    let mut stack = TestStack::new();
    let thread = create_thread(&harness, recursive_prober, argument_of(&scenario), &mut stack);
    thread.start();

    let probe = || {
        scenario.probe.signal();
        scenario.probed.wait();
        scenario.acquired.load(Ordering::SeqCst)
    };

    scenario.mutex.lock();
    scenario.mutex.lock();
    assert!(!probe());
    scenario.mutex.unlock();
    assert!(!probe());
    scenario.mutex.unlock();
    assert!(probe());

    thread.wait();
}

/// ============================================================================
/// Condition Variable
/// ============================================================================

struct Handoff {
    mutex: Mutex,
    condition: ConditionVariable,
    ready: Barrier,
    registered: AtomicU32,
    done: AtomicBool,
    woken: AtomicU32,
}

impl Handoff {
    fn new(threads: u64) -> Self {
        Self {
            mutex: Mutex::new(false),
            condition: ConditionVariable::new(),
            ready: Barrier::new(threads + 1),
            registered: AtomicU32::new(0),
            done: AtomicBool::new(false),
            woken: AtomicU32::new(0),
        }
    }

    /// Take the mutex once `count` waiters sleep on the condition.
    ///
    /// A waiter only gives the mutex up inside `wait`, so holding it with
    /// the count reached means every waiter is registered.
    fn lock_when_registered(&self, count: u32) {
        loop {
            self.mutex.lock();
            if self.registered.load(Ordering::SeqCst) == count {
                return;
            }
            self.mutex.unlock();
            sleep_thread(1_000_000);
        }
    }
}

fn handoff_waiter(argument: *mut u8) {
    // SAFETY: the test keeps the handoff alive until the threads are gone.
    let handoff = unsafe { shared::<Handoff>(argument) };
    handoff.ready.wait();

    handoff.mutex.lock();
    handoff.registered.fetch_add(1, Ordering::SeqCst);
    while !handoff.done.load(Ordering::SeqCst) {
        handoff.condition.wait(&handoff.mutex);
    }
    handoff.woken.fetch_add(1, Ordering::SeqCst);
    handoff.mutex.unlock();
}

#[test]
fn test_signal_after_registration_wakes_waiter() {
    let harness = Harness::new();
    let handoff = Handoff::new(1);
    let mut stack = TestStack::new();
    let thread = create_thread(&harness, handoff_waiter, argument_of(&handoff), &mut stack);
    thread.start();

    handoff.ready.wait();
    handoff.lock_when_registered(1);
    handoff.done.store(true, Ordering::SeqCst);
    handoff.condition.signal();
    handoff.mutex.unlock();

    thread.wait();
    assert_eq!(handoff.woken.load(Ordering::SeqCst), 1);
}

#[test]
fn test_broadcast_wakes_every_waiter() {
    const WAITERS: usize = 4;

    let harness = Harness::new();
    let handoff = Handoff::new(WAITERS as u64);
    let mut stacks = stacks(WAITERS);
    let threads = start_all(&harness, handoff_waiter, argument_of(&handoff), &mut stacks);

    handoff.ready.wait();
    handoff.lock_when_registered(WAITERS as u32);
    handoff.done.store(true, Ordering::SeqCst);
    handoff.condition.broadcast();
    handoff.mutex.unlock();

    join_all(threads);
    assert_eq!(handoff.woken.load(Ordering::SeqCst), WAITERS as u32);
}

struct TimedHandoff {
    mutex: Mutex,
    condition: ConditionVariable,
    registered: AtomicBool,
    done: AtomicBool,
    signaled: AtomicBool,
    held_mutex: AtomicBool,
    held_section: AtomicBool,
}

fn timed_waiter(argument: *mut u8) {
    // SAFETY: the test keeps the handoff alive until the thread is gone.
    let handoff = unsafe { shared::<TimedHandoff>(argument) };

    handoff.mutex.lock();
    handoff.registered.store(true, Ordering::SeqCst);
    while !handoff.done.load(Ordering::SeqCst) {
        let status = handoff.condition.wait_timeout(&handoff.mutex, TIMEOUT.as_nanos() as i64);
        handoff.signaled.store(status == ConditionVariableStatus::NoTimeOut, Ordering::SeqCst);
    }
    handoff.held_mutex.store(handoff.mutex.is_locked_by_current_thread(), Ordering::SeqCst);
    handoff
        .held_section
        .store(handoff.mutex.critical_section().is_locked_by_current_thread(), Ordering::SeqCst);
    handoff.mutex.unlock();
}

#[test]
fn test_signaled_timed_wait_holds_mutex_again() {
    let harness = Harness::new();
    let handoff = TimedHandoff {
        mutex: Mutex::new(false),
        condition: ConditionVariable::new(),
        registered: AtomicBool::new(false),
        done: AtomicBool::new(false),
        signaled: AtomicBool::new(false),
        held_mutex: AtomicBool::new(false),
        held_section: AtomicBool::new(false),
    };
    let mut stack = TestStack::new();
    let thread = create_thread(&harness, timed_waiter, argument_of(&handoff), &mut stack);
    thread.start();

    // Holding the mutex after registration means the waiter is asleep.
    loop {
        handoff.mutex.lock();
        if handoff.registered.load(Ordering::SeqCst) {
            break;
        }
        handoff.mutex.unlock();
        sleep_thread(1_000_000);
    }
    handoff.done.store(true, Ordering::SeqCst);
    handoff.condition.signal();
    handoff.mutex.unlock();

    thread.wait();
    assert!(handoff.signaled.load(Ordering::SeqCst));
    assert!(handoff.held_mutex.load(Ordering::SeqCst));
    assert!(handoff.held_section.load(Ordering::SeqCst));
    assert!(!handoff.mutex.critical_section().is_locked());
}

/// ============================================================================
/// Events
/// ============================================================================

struct EventWaiters {
    event: UserEvent,
    woken: AtomicU32,
}

fn event_waiter(argument: *mut u8) {
    // SAFETY: the test keeps the event alive until the threads are gone.
    let waiters = unsafe { shared::<EventWaiters>(argument) };
    waiters.event.wait();
    waiters.woken.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_auto_clear_event_releases_one_waiter_per_signal() {
    let harness = Harness::new();
    let waiters = EventWaiters { event: UserEvent::new(false, true), woken: AtomicU32::new(0) };
    let mut stacks = stacks(2);
    let threads = start_all(&harness, event_waiter, argument_of(&waiters), &mut stacks);

    waiters.event.signal();
    wait_until(TIMEOUT, || waiters.woken.load(Ordering::SeqCst) == 1);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(waiters.woken.load(Ordering::SeqCst), 1);

    waiters.event.signal();
    join_all(threads);
    assert_eq!(waiters.woken.load(Ordering::SeqCst), 2);
    assert!(!waiters.event.is_signaled());
}

#[test]
fn test_manual_event_releases_every_waiter() {
    let harness = Harness::new();
    let waiters = EventWaiters { event: UserEvent::new(false, false), woken: AtomicU32::new(0) };
    let mut stacks = stacks(3);
    let threads = start_all(&harness, event_waiter, argument_of(&waiters), &mut stacks);

    std::thread::sleep(Duration::from_millis(10));
    waiters.event.signal();
    join_all(threads);
    assert_eq!(waiters.woken.load(Ordering::SeqCst), 3);
    assert!(waiters.event.is_signaled());
}

struct RemoteEvent {
    readable: AtomicU32,
    observed: AtomicBool,
}

fn remote_event_waiter(argument: *mut u8) {
    // SAFETY: the test keeps the record alive until the thread is gone.
    let remote = unsafe { shared::<RemoteEvent>(argument) };
    let mut event = KernelEvent::new();
    event.load(Some(Handle::from_raw(remote.readable.load(Ordering::SeqCst))), None, true);
    event.wait();
    remote.observed.store(true, Ordering::SeqCst);
}

#[test]
fn test_kernel_event_handed_to_another_thread() {
    let harness = Harness::new();
    let mut event = KernelEvent::new();
    event.create(true).unwrap();
    let remote = RemoteEvent {
        readable: AtomicU32::new(event.pop_readable_handle().raw()),
        observed: AtomicBool::new(false),
    };

    let mut stack = TestStack::new();
    let thread = create_thread(&harness, remote_event_waiter, argument_of(&remote), &mut stack);
    thread.start();
    std::thread::sleep(Duration::from_millis(10));
    assert!(!remote.observed.load(Ordering::SeqCst));

    event.signal().unwrap();
    thread.wait();
    thread.destroy();
    assert!(remote.observed.load(Ordering::SeqCst));

    // The waiter closed the readable side; only the writable one is left.
    drop(event);
    assert_eq!(harness.kernel.open_handle_count(), 1);
}

/// ============================================================================
/// Barrier
/// ============================================================================

struct Gate {
    barrier: Barrier,
    passed: AtomicU32,
}

fn gate_waiter(argument: *mut u8) {
    // SAFETY: the test keeps the gate alive until the threads are gone.
    let gate = unsafe { shared::<Gate>(argument) };
    gate.barrier.wait();
    gate.passed.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn test_barrier_releases_on_last_arrival() {
    let harness = Harness::new();
    let gate = Gate { barrier: Barrier::new(3), passed: AtomicU32::new(0) };
    let mut stacks = stacks(2);
    let threads = start_all(&harness, gate_waiter, argument_of(&gate), &mut stacks);

    wait_until(TIMEOUT, || gate.barrier.arrive_count() == 2);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(gate.passed.load(Ordering::SeqCst), 0);

    gate.barrier.wait();
    join_all(threads);
    assert_eq!(gate.passed.load(Ordering::SeqCst), 2);
    assert_eq!(gate.barrier.arrive_count(), 3);
}
