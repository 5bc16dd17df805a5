//! Physical frame allocator
//!
//! A dense array of small reference counts, one per 4 KiB frame between
//! `low_mem` and `high_mem`. Zero means free; N means N logical owners
//! (page-table entries above `low_mem`). Allocation scans from the high
//! end downward so frequently freed low memory stays cold.
//!
//! Invalid frees indicate kernel corruption and panic; exhaustion is the
//! only recoverable failure and surfaces as `None`.

use spin::Mutex;

use super::{PhysicalAddress, PAGE_SIZE};

/// Capacity of the frame map: 16 MiB of managed memory. The actual window
/// is set at [`FrameMap::init`] and may be smaller.
pub const MAX_PAGING_FRAMES: usize = 4096;

/// Reference-counted map of the managed physical frames.
pub struct FrameMap {
    low_mem: u64,
    high_mem: u64,
    paging_frames: usize,
    map: [u16; MAX_PAGING_FRAMES],
}

impl FrameMap {
    /// An unconfigured map; every query treats memory as unmanaged until
    /// [`init`](Self::init) runs.
    pub const fn empty() -> Self {
        Self {
            low_mem: 0,
            high_mem: 0,
            paging_frames: 0,
            map: [0; MAX_PAGING_FRAMES],
        }
    }

    /// Configure the managed window `[low, high)`. All frames start free.
    ///
    /// Panics on a misaligned or oversized window; both mean the boot
    /// collaborator handed us garbage.
    pub fn init(&mut self, low: PhysicalAddress, high: PhysicalAddress) {
        if !low.is_frame_aligned() || !high.is_frame_aligned() || high <= low {
            panic!("mem_init called with bad window");
        }
        let frames = ((high.as_u64() - low.as_u64()) as usize) / PAGE_SIZE;
        if frames > MAX_PAGING_FRAMES {
            panic!("mem_init window exceeds frame map capacity");
        }
        self.low_mem = low.as_u64();
        self.high_mem = high.as_u64();
        self.paging_frames = frames;
        self.map[..frames].fill(0);
    }

    /// Whether `addr` falls in the managed (refcounted) window.
    pub fn is_managed(&self, addr: PhysicalAddress) -> bool {
        addr.as_u64() >= self.low_mem && addr.as_u64() < self.high_mem
    }

    fn map_nr(&self, addr: PhysicalAddress) -> usize {
        ((addr.as_u64() - self.low_mem) as usize) >> 12
    }

    /// Get the physical address of the first (actually last) free frame and
    /// mark it used. The frame is zeroed. `None` when memory is exhausted.
    pub fn get_free_page(&mut self) -> Option<PhysicalAddress> {
        for i in (0..self.paging_frames).rev() {
            if self.map[i] == 0 {
                self.map[i] = 1;
                let page = PhysicalAddress::new(self.low_mem + ((i as u64) << 12));
                // SAFETY: the frame lies inside the managed window, which is
                // identity-mapped (host tests back it with an arena).
                unsafe {
                    core::ptr::write_bytes(page.as_mut_ptr::<u8>(), 0, PAGE_SIZE);
                }
                return Some(page);
            }
        }
        None
    }

    /// Drop one reference to the frame at `addr`, freeing it when the count
    /// reaches zero.
    ///
    /// Addresses below the managed window are reserved kernel memory and
    /// ignored. Addresses beyond it, or frames already free, are kernel
    /// corruption and panic.
    pub fn free_page(&mut self, addr: PhysicalAddress) {
        if addr.as_u64() < self.low_mem {
            return;
        }
        if addr.as_u64() >= self.high_mem {
            panic!("trying to free nonexistent page");
        }
        let nr = self.map_nr(addr);
        if self.map[nr] == 0 {
            panic!("trying to free free page");
        }
        self.map[nr] -= 1;
    }

    /// Add an owner to a managed frame (copy-on-write sharing). Unmanaged
    /// addresses are ignored.
    pub fn inc_ref(&mut self, addr: PhysicalAddress) {
        if self.is_managed(addr) {
            let nr = self.map_nr(addr);
            self.map[nr] += 1;
        }
    }

    /// Current owner count of a managed frame; 0 for free or unmanaged.
    pub fn ref_count(&self, addr: PhysicalAddress) -> u16 {
        if self.is_managed(addr) {
            self.map[self.map_nr(addr)]
        } else {
            0
        }
    }

    /// Number of free frames. Pure observation, for diagnostics.
    pub fn count_free(&self) -> usize {
        self.map[..self.paging_frames]
            .iter()
            .filter(|&&c| c == 0)
            .count()
    }

    /// Total managed frames in the configured window.
    pub fn total_frames(&self) -> usize {
        self.paging_frames
    }

    /// Low bound of the managed window.
    pub fn low_mem(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.low_mem)
    }
}

/// Global frame map instance
pub static FRAME_MAP: Mutex<FrameMap> = Mutex::new(FrameMap::empty());

/// Configure the global frame map. Called once at boot by `kernel_main`.
pub fn mem_init(low: PhysicalAddress, high: PhysicalAddress) {
    FRAME_MAP.lock().init(low, high);
    log::info!(
        "mm: managing {} frames in {:#x}..{:#x}",
        FRAME_MAP.lock().total_frames(),
        low.as_u64(),
        high.as_u64()
    );
}
