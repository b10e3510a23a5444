// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread List
//!
//! Registry of every live thread of the process. Entries live in a slot
//! table indexed by [`ThreadId`]; freed slots are reused. Slot 0 is the
//! main thread and is never removed.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::os::critical_section::Guarded;
use crate::os::thread::ThreadContext;

/// Stable index of a thread in the [`ThreadList`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u32);

impl ThreadId {
    /// The bootstrap thread
    pub const MAIN: Self = Self(0);

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct Slots {
    entries: Vec<Option<Arc<ThreadContext>>>,
    free: Vec<u32>,
}

#[derive(Debug)]
pub struct ThreadList {
    main_thread: Arc<ThreadContext>,
    slots: Guarded<Slots>,
}

impl ThreadList {
    pub fn new(main_thread: Arc<ThreadContext>) -> Self {
        Self {
            slots: Guarded::new(Slots { entries: vec![Some(main_thread.clone())], free: Vec::new() }),
            main_thread,
        }
    }

    pub fn main_thread(&self) -> &Arc<ThreadContext> {
        &self.main_thread
    }

    /// Register a thread and get its slot.
    pub fn add(&self, thread: Arc<ThreadContext>) -> ThreadId {
        let mut slots = self.slots.lock();
        match slots.free.pop() {
            Some(index) => {
                slots.entries[index as usize] = Some(thread);
                ThreadId(index)
            }
            None => {
                let index = slots.entries.len() as u32;
                slots.entries.push(Some(thread));
                ThreadId(index)
            }
        }
    }

    /// Unregister a thread. Removing the main thread does nothing.
    pub fn remove(&self, id: ThreadId) -> Option<Arc<ThreadContext>> {
        if id == ThreadId::MAIN {
            return None;
        }
        let mut slots = self.slots.lock();
        let removed = slots.entries.get_mut(id.index()).and_then(Option::take);
        if removed.is_some() {
            slots.free.push(id.0);
        }
        removed
    }

    pub fn get(&self, id: ThreadId) -> Option<Arc<ThreadContext>> {
        self.slots.lock().entries.get(id.index()).cloned().flatten()
    }

    /// Number of registered threads, the main thread included
    pub fn len(&self) -> usize {
        let slots = self.slots.lock();
        slots.entries.len() - slots.free.len()
    }

    /// Copy of the registered threads, in slot order.
    ///
    /// Taken so callers can inspect threads without holding the list.
    pub fn snapshot(&self) -> Vec<Arc<ThreadContext>> {
        self.slots.lock().entries.iter().flatten().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::thread::ThreadContext;
    use crate::tests::Harness;

    fn detached_context(harness: &Harness, raw: u32) -> Arc<ThreadContext> {
        Arc::new(ThreadContext::adopt(
            harness.runtime.kernel().clone(),
            crate::svc::Handle::from_raw(raw),
            "Detached",
            0x2C,
        ))
    }

    #[test]
    fn test_main_thread_is_permanent() {
        let harness = Harness::new();
        let list = harness.runtime.threads();
        assert_eq!(list.len(), 1);
        assert!(list.remove(ThreadId::MAIN).is_none());
        assert!(Arc::ptr_eq(&list.get(ThreadId::MAIN).unwrap(), list.main_thread()));
    }

    #[test]
    fn test_slots_are_reused() {
        let harness = Harness::new();
        let list = harness.runtime.threads();

        let first = list.add(detached_context(&harness, 0x500));
        let second = list.add(detached_context(&harness, 0x501));
        assert_eq!(list.len(), 3);
        assert_ne!(first, second);

        assert_eq!(list.remove(first).unwrap().handle().raw(), 0x500);
        assert!(list.remove(first).is_none());
        assert!(list.get(first).is_none());

        let third = list.add(detached_context(&harness, 0x502));
        assert_eq!(third, first);
        assert_eq!(list.get(second).unwrap().handle().raw(), 0x501);

        let handles: Vec<u32> = list.snapshot().iter().map(|thread| thread.handle().raw()).collect();
        assert_eq!(handles.len(), 3);
        assert!(handles.contains(&0x502));
    }
}
