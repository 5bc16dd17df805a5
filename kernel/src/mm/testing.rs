//! Host-memory arena backing the paging and fork tests
//!
//! The kernel treats physical memory as identity-mapped. Tests keep that
//! contract by carving the "managed physical window" out of real host
//! memory: frame addresses handed out by the allocator are plain host
//! pointers, so zeroing, page-table walks and COW copies all execute for
//! real.

use std::alloc::{alloc_zeroed, dealloc, Layout};

use super::{FrameMap, PhysicalAddress, PAGE_SIZE};

/// A frame-aligned, zeroed block of host memory posing as the managed
/// physical window.
pub struct PhysArena {
    base: *mut u8,
    layout: Layout,
    frames: usize,
}

impl PhysArena {
    /// Allocate an arena of `frames` 4 KiB frames.
    pub fn new(frames: usize) -> Self {
        let layout = Layout::from_size_align(frames * PAGE_SIZE, PAGE_SIZE)
            .expect("arena layout");
        // SAFETY: layout has non-zero size and valid alignment.
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null(), "arena allocation failed");
        Self { base, layout, frames }
    }

    /// Low bound of the simulated managed window.
    pub fn low(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base as u64)
    }

    /// One past the high bound of the simulated managed window.
    pub fn high(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base as u64 + (self.frames * PAGE_SIZE) as u64)
    }

    /// A fresh frame map configured over this arena.
    pub fn frame_map(&self) -> FrameMap {
        let mut map = FrameMap::empty();
        map.init(self.low(), self.high());
        map
    }
}

impl Drop for PhysArena {
    fn drop(&mut self) {
        // SAFETY: base/layout come from alloc_zeroed above.
        unsafe { dealloc(self.base, self.layout) };
    }
}
