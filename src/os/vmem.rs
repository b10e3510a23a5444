// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Virtual Memory Allocator
//!
//! Finds unused ranges of an address-space window, chiefly for thread
//! stack aliases. The kernel's memory map is the only record of what is
//! in use; the allocator just keeps a cursor so consecutive reservations
//! do not rescan the same addresses.
//!
//! # Layout
//!
//! ```text
//! start                                                         end
//! |  guard | reservation | guard | reservation | ... cursor ->    |
//! ```
//!
//! Every candidate is preceded by one guard page of untouched address
//! space. When the cursor runs off the end of the window the scan restarts
//! once from the start before giving up.

use crate::debug::{log_debug, log_trace, log_warn};
use crate::os::critical_section::Guarded;
use crate::svc::{MemoryState, Svc, PAGE_SIZE};

/// Round `value` up to a multiple of `alignment` (a power of two).
pub fn align_up(value: usize, alignment: usize) -> Option<usize> {
    value.checked_add(alignment - 1).map(|value| value & !(alignment - 1))
}

/// Address-space cursor over `[start, end)`
#[derive(Debug)]
pub struct VirtualMemoryAllocator {
    start: usize,
    end: usize,
    guard_page_size: usize,
    next_available: Guarded<usize>,
}

impl VirtualMemoryAllocator {
    pub fn new(start: usize, end: usize, guard_page_size: usize) -> Self {
        crate::rt_assert!(start < end, "empty allocator window {:#x}..{:#x}", start, end);
        Self { start, end, guard_page_size, next_available: Guarded::new(start) }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn guard_page_size(&self) -> usize {
        self.guard_page_size
    }

    fn contains(&self, address: usize) -> bool {
        address >= self.start && address < self.end
    }

    fn fits(&self, address: usize, size: usize) -> bool {
        address >= self.start && address.checked_add(size).map_or(false, |end| end <= self.end)
    }

    /// Find `size` bytes (rounded up to pages) of free address space
    /// aligned to `alignment`.
    ///
    /// Returns `None` when a full scan finds nothing.
    pub fn reserve(&self, kernel: &dyn Svc, size: usize, alignment: usize) -> Option<usize> {
        crate::rt_assert!(size != 0, "empty reservation");
        crate::rt_assert!(alignment.is_power_of_two(), "alignment {:#x} is not a power of two", alignment);
        let size = align_up(size, PAGE_SIZE)?;

        let mut next_available = self.next_available.lock();
        if !self.contains(*next_available) {
            *next_available = self.start;
        }

        let mut address = *next_available;
        let mut wrapped = false;
        loop {
            let candidate = address
                .checked_add(self.guard_page_size)
                .and_then(|address| align_up(address, alignment))
                .filter(|candidate| self.fits(*candidate, size));
            let Some(candidate) = candidate else {
                if wrapped {
                    log_warn!(
                        "no {:#x} byte range left in {:#x}..{:#x}",
                        size,
                        self.start,
                        self.end
                    );
                    return None;
                }
                log_debug!("address allocator wrapped around at {:#x}", address);
                wrapped = true;
                address = self.start;
                continue;
            };

            let info = crate::rt_abort_on_err!(kernel.query_memory(candidate));
            if info.state != MemoryState::Free || info.end() - candidate < size {
                address = info.end();
                continue;
            }

            *next_available = candidate + size;
            log_trace!("reserved {:#x}..{:#x}", candidate, candidate + size);
            return Some(candidate);
        }
    }

    /// Hand back a reservation once its mapping is gone.
    ///
    /// Only the most recent reservation moves the cursor back; anything
    /// older is found again by the next scan.
    pub fn release(&self, address: usize, size: usize) {
        let Some(size) = align_up(size, PAGE_SIZE) else {
            return;
        };
        let mut next_available = self.next_available.lock();
        if address.checked_add(size) == Some(*next_available) {
            *next_available = address.saturating_sub(self.guard_page_size);
        }
    }
}
