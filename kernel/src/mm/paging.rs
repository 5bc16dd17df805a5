//! Four-level page tree operations
//!
//! All tasks share one page tree; each task owns a disjoint 64 MiB window
//! of it, indexed by its task-table slot. The walker materializes missing
//! levels on demand when asked to (`create`), and every operation that
//! needs a frame takes the frame map as an explicit parameter so the same
//! code runs against the global map on bare metal and against an arena
//! under test.
//!
//! Interrupts are disabled across page-fault handling; the copy-on-write
//! resolution order (drop old reference, install new frame, flush, copy)
//! relies on that.

use super::frame_allocator::FrameMap;
use super::page_table::{PageTable, PageTableEntry, PAGE_TABLE_ENTRIES};
use super::{PageFlags, PhysicalAddress, VirtualAddress, BLOCK_2M, PAGE_SIZE};
use crate::error::{KernelError, Result};

/// Fixed physical address of the kernel's PML4, set up by the boot
/// collaborator.
pub const PML4_ADDR: u64 = 0x1000;

/// Root of the shared kernel tree. Defaults to the boot collaborator's
/// fixed PML4; host tests point it at an arena-backed root instead.
static KERNEL_ROOT: core::sync::atomic::AtomicU64 =
    core::sync::atomic::AtomicU64::new(PML4_ADDR);

/// Re-root the shared kernel tree. Called once at boot (or test setup),
/// before any task exists.
pub fn paging_init(root: PhysicalAddress) {
    KERNEL_ROOT.store(root.as_u64(), core::sync::atomic::Ordering::Relaxed);
}

/// Handle to a four-level page tree rooted at a physical frame.
#[derive(Debug, Clone, Copy)]
pub struct AddressSpace {
    root: PhysicalAddress,
}

impl AddressSpace {
    /// Wrap an existing PML4 frame.
    ///
    /// # Safety
    /// `root` must point to a frame-aligned, live PML4 whose reachable
    /// entries are all Present.
    pub const unsafe fn from_root(root: PhysicalAddress) -> Self {
        Self { root }
    }

    /// Allocate a fresh, empty tree.
    pub fn new(mem: &mut FrameMap) -> Result<Self> {
        let root = mem.get_free_page().ok_or(KernelError::OutOfMemory)?;
        Ok(Self { root })
    }

    /// The shared kernel tree.
    pub fn kernel() -> Self {
        let root = KERNEL_ROOT.load(core::sync::atomic::Ordering::Relaxed);
        // SAFETY: paging_init recorded a valid, live PML4.
        unsafe { Self::from_root(PhysicalAddress::new(root)) }
    }

    pub const fn root(&self) -> PhysicalAddress {
        self.root
    }

    fn table_at(addr: PhysicalAddress) -> *mut PageTable {
        addr.as_mut_ptr::<PageTable>()
    }

    /// Resolve one level: follow a Present entry, or (with `create`)
    /// install a fresh zeroed table with {Present, Writable, User}.
    fn next_table(
        entry: &mut PageTableEntry,
        create: bool,
        mem: &mut FrameMap,
    ) -> Result<Option<PhysicalAddress>> {
        if let Some(addr) = entry.addr() {
            return Ok(Some(addr));
        }
        if !create {
            return Ok(None);
        }
        let page = mem.get_free_page().ok_or(KernelError::OutOfMemory)?;
        entry.set(page, PageFlags::user_rw());
        Ok(Some(page))
    }

    /// Walk down to the page table covering `vaddr`.
    fn page_table_for(
        &self,
        vaddr: VirtualAddress,
        create: bool,
        mem: &mut FrameMap,
    ) -> Result<Option<*mut PageTable>> {
        // SAFETY: root and every Present intermediate entry point at live,
        // identity-mapped table frames (module invariant).
        let pml4 = unsafe { &mut *Self::table_at(self.root) };
        let pdpt = match Self::next_table(&mut pml4[vaddr.pml4_index()], create, mem)? {
            Some(addr) => unsafe { &mut *Self::table_at(addr) },
            None => return Ok(None),
        };
        let pd = match Self::next_table(&mut pdpt[vaddr.pdpt_index()], create, mem)? {
            Some(addr) => unsafe { &mut *Self::table_at(addr) },
            None => return Ok(None),
        };
        match Self::next_table(&mut pd[vaddr.pd_index()], create, mem)? {
            Some(addr) => Ok(Some(Self::table_at(addr))),
            None => Ok(None),
        }
    }

    /// Walk down to the leaf entry for `vaddr`.
    fn pte_for(
        &self,
        vaddr: VirtualAddress,
        create: bool,
        mem: &mut FrameMap,
    ) -> Result<Option<*mut PageTableEntry>> {
        match self.page_table_for(vaddr, create, mem)? {
            // SAFETY: the walk just produced a live table pointer.
            Some(pt) => Ok(Some(unsafe { &mut (&mut (*pt))[vaddr.pt_index()] as *mut _ })),
            None => Ok(None),
        }
    }

    /// Read the leaf entry for `vaddr` without modifying the tree.
    pub fn probe(&self, vaddr: VirtualAddress) -> Option<PageTableEntry> {
        // SAFETY: read-only walk over live table frames.
        let pml4 = unsafe { &*Self::table_at(self.root) };
        let pdpt = unsafe { &*Self::table_at(pml4[vaddr.pml4_index()].addr()?) };
        let pd = unsafe { &*Self::table_at(pdpt[vaddr.pdpt_index()].addr()?) };
        let pt = unsafe { &*Self::table_at(pd[vaddr.pd_index()].addr()?) };
        let entry = pt[vaddr.pt_index()];
        entry.is_present().then_some(entry)
    }

    /// Map `page` at `vaddr` with {Present, Writable, User}, creating
    /// intermediate tables as needed. Does not touch reference counts; the
    /// caller must already own the frame.
    pub fn put_page(
        &self,
        mem: &mut FrameMap,
        page: PhysicalAddress,
        vaddr: VirtualAddress,
    ) -> Result<PhysicalAddress> {
        if !mem.is_managed(page) {
            log::warn!("put_page: {:#x} outside managed memory", page.as_u64());
        } else if mem.ref_count(page) != 1 {
            log::warn!(
                "put_page: frame map disagrees with {:#x} at {:#x}",
                page.as_u64(),
                vaddr.as_u64()
            );
        }
        match self.pte_for(vaddr, true, mem)? {
            Some(pte) => {
                // SAFETY: pte_for returned a live leaf entry.
                unsafe { (*pte).set(page, PageFlags::user_rw()) };
                Ok(page)
            }
            None => Err(KernelError::OutOfMemory),
        }
    }

    /// Unmap a 2 MiB-aligned range, releasing managed backing frames.
    ///
    /// `size` is rounded up to 2 MiB. The TLB is invalidated once at the
    /// end. Misalignment and attempts to free the kernel's own low space
    /// are corruption and panic.
    pub fn free_page_tables(&self, mem: &mut FrameMap, from: VirtualAddress, size: u64) {
        if from.as_u64() & (BLOCK_2M - 1) != 0 {
            panic!("free_page_tables called with wrong alignment");
        }
        if from.as_u64() == 0 {
            panic!("Trying to free up swapper memory space");
        }
        let size = (size + BLOCK_2M - 1) & !(BLOCK_2M - 1);

        let mut block = from;
        while block.as_u64() < from.as_u64() + size {
            // A missing page table lets us skip the whole 2 MiB block.
            let pt = match self.page_table_for(block, false, mem) {
                Ok(Some(pt)) => pt,
                _ => {
                    block = block.add(BLOCK_2M);
                    continue;
                }
            };
            for i in 0..PAGE_TABLE_ENTRIES {
                // SAFETY: pt is a live table frame from the walk above.
                let entry = unsafe { &mut (&mut (*pt))[i] };
                if let Some(page) = entry.addr() {
                    mem.free_page(page);
                    entry.clear();
                }
            }
            block = block.add(BLOCK_2M);
        }
        invalidate();
    }

    /// Copy-on-write clone of `[from, from+size)` onto `[to, to+size)`.
    ///
    /// Every populated source slot loses its Writable bit on *both* sides
    /// and, when the frame is managed, gains one owner in the frame map.
    /// `size` is rounded up to 2 MiB; both bases must be 2 MiB-aligned.
    /// On allocation failure the partially built destination is left in
    /// place for the caller to tear down with [`free_page_tables`].
    pub fn copy_page_tables(
        &self,
        mem: &mut FrameMap,
        from: VirtualAddress,
        to: VirtualAddress,
        size: u64,
    ) -> Result<()> {
        if from.as_u64() & (BLOCK_2M - 1) != 0 || to.as_u64() & (BLOCK_2M - 1) != 0 {
            panic!("copy_page_tables called with wrong alignment");
        }
        let size = (size + BLOCK_2M - 1) & !(BLOCK_2M - 1);

        let mut off = 0;
        while off < size {
            let src_pt = match self.page_table_for(from.add(off), false, mem)? {
                Some(pt) => pt,
                None => {
                    off += BLOCK_2M;
                    continue;
                }
            };
            let dst_pt = match self.page_table_for(to.add(off), true, mem)? {
                Some(pt) => pt,
                None => return Err(KernelError::OutOfMemory),
            };
            for i in 0..PAGE_TABLE_ENTRIES {
                // SAFETY: both tables are live frames; source and
                // destination windows are disjoint per the slot invariant.
                let src = unsafe { &mut (&mut (*src_pt))[i] };
                let Some(page) = src.addr() else { continue };

                let mut shared = *src;
                shared.clear_writable();
                unsafe { (&mut (*dst_pt))[i] = shared };
                if mem.is_managed(page) {
                    *src = shared;
                    mem.inc_ref(page);
                }
            }
            off += BLOCK_2M;
        }
        invalidate();
        Ok(())
    }

    /// Resolve a write-protect fault at `vaddr` (copy-on-write).
    pub fn do_wp_page(&self, mem: &mut FrameMap, vaddr: VirtualAddress) -> Result<()> {
        match self.pte_for(vaddr, false, mem)? {
            // SAFETY: live leaf entry from the walk.
            Some(pte) => un_wp_page(mem, unsafe { &mut *pte }),
            None => Ok(()),
        }
    }

    /// Force a mapping at `vaddr` writable before the kernel writes through
    /// it on a user's behalf. A Present, non-Writable leaf gets the full
    /// copy-on-write treatment; anything else is a no-op.
    pub fn write_verify(&self, mem: &mut FrameMap, vaddr: VirtualAddress) -> Result<()> {
        if let Some(pte) = self.pte_for(vaddr, false, mem)? {
            // SAFETY: live leaf entry from the walk.
            let entry = unsafe { &mut *pte };
            if entry.is_present() && !entry.is_writable() {
                return un_wp_page(mem, entry);
            }
        }
        Ok(())
    }

    /// Resolve a not-present fault at `vaddr` with a fresh zeroed frame.
    pub fn do_no_page(&self, mem: &mut FrameMap, vaddr: VirtualAddress) -> Result<()> {
        let page = mem.get_free_page().ok_or(KernelError::OutOfMemory)?;
        match self.put_page(mem, page, vaddr) {
            Ok(_) => Ok(()),
            Err(e) => {
                mem.free_page(page);
                Err(e)
            }
        }
    }
}

/// Copy-on-write resolution for a faulting leaf entry.
///
/// Sole owner of a managed frame: flip Writable in place. Otherwise move
/// the faulting side onto a fresh frame: drop the old reference, install
/// the new frame, flush, then copy. Safe only because interrupts stay
/// disabled across page-fault handling.
pub fn un_wp_page(mem: &mut FrameMap, entry: &mut PageTableEntry) -> Result<()> {
    let Some(old_page) = entry.addr() else {
        return Ok(());
    };
    if mem.is_managed(old_page) && mem.ref_count(old_page) == 1 {
        entry.set_writable();
        invalidate();
        return Ok(());
    }
    let new_page = mem.get_free_page().ok_or(KernelError::OutOfMemory)?;
    if mem.is_managed(old_page) {
        mem.free_page(old_page);
    }
    entry.set(new_page, PageFlags::user_rw());
    invalidate();
    copy_page(old_page, new_page);
    Ok(())
}

/// Copy one 4 KiB frame.
fn copy_page(from: PhysicalAddress, to: PhysicalAddress) {
    // SAFETY: both are distinct live frames (identity-mapped).
    unsafe {
        core::ptr::copy_nonoverlapping(from.as_ptr::<u8>(), to.as_mut_ptr::<u8>(), PAGE_SIZE);
    }
}

/// Invalidate all non-global TLB entries by reloading the root register.
pub fn invalidate() {
    crate::arch::invalidate_tlb();
}

#[cfg(test)]
mod tests {
    use super::super::testing::PhysArena;
    use super::*;

    const WINDOW: u64 = 0x0400_0000;

    #[test]
    fn put_page_then_probe() {
        let arena = PhysArena::new(32);
        let mut mem = arena.frame_map();
        let space = AddressSpace::new(&mut mem).unwrap();

        let page = mem.get_free_page().unwrap();
        let vaddr = VirtualAddress::new(WINDOW);
        space.put_page(&mut mem, page, vaddr).unwrap();

        let entry = space.probe(vaddr).unwrap();
        assert_eq!(entry.addr(), Some(page));
        assert!(entry.is_writable());
        assert!(space.probe(vaddr.add(PAGE_SIZE as u64)).is_none());
    }

    #[test]
    fn clone_write_protects_both_sides_and_bumps_refcount() {
        let arena = PhysArena::new(32);
        let mut mem = arena.frame_map();
        let space = AddressSpace::new(&mut mem).unwrap();

        let page = mem.get_free_page().unwrap();
        let src = VirtualAddress::new(WINDOW);
        let dst = VirtualAddress::new(2 * WINDOW);
        space.put_page(&mut mem, page, src).unwrap();

        space
            .copy_page_tables(&mut mem, src, dst, PAGE_SIZE as u64)
            .unwrap();

        assert_eq!(mem.ref_count(page), 2);
        let s = space.probe(src).unwrap();
        let d = space.probe(dst).unwrap();
        assert!(!s.is_writable());
        assert!(!d.is_writable());
        assert_eq!(s.addr(), Some(page));
        assert_eq!(d.addr(), Some(page));
    }

    #[test]
    fn refcount_balance_after_clone_and_unmap() {
        let arena = PhysArena::new(64);
        let mut mem = arena.frame_map();
        let space = AddressSpace::new(&mut mem).unwrap();

        let src = VirtualAddress::new(WINDOW);
        let dst = VirtualAddress::new(2 * WINDOW);
        let mut pages = std::vec::Vec::new();
        for i in 0..4u64 {
            let page = mem.get_free_page().unwrap();
            space
                .put_page(&mut mem, page, src.add(i * PAGE_SIZE as u64))
                .unwrap();
            pages.push(page);
        }

        space
            .copy_page_tables(&mut mem, src, dst, 4 * PAGE_SIZE as u64)
            .unwrap();
        for &page in &pages {
            assert_eq!(mem.ref_count(page), 2);
        }

        space.free_page_tables(&mut mem, dst, 4 * PAGE_SIZE as u64);
        for &page in &pages {
            assert_eq!(mem.ref_count(page), 1);
        }
        space.free_page_tables(&mut mem, src, 4 * PAGE_SIZE as u64);
        for &page in &pages {
            assert_eq!(mem.ref_count(page), 0);
        }
    }

    #[test]
    fn cow_write_with_shared_frame_copies() {
        let arena = PhysArena::new(32);
        let mut mem = arena.frame_map();
        let space = AddressSpace::new(&mut mem).unwrap();

        let page = mem.get_free_page().unwrap();
        // Recognizable payload so the copy is observable.
        unsafe { page.as_mut_ptr::<u64>().write(0xDEAD_BEEF) };
        let src = VirtualAddress::new(WINDOW);
        let dst = VirtualAddress::new(2 * WINDOW);
        space.put_page(&mut mem, page, src).unwrap();
        space
            .copy_page_tables(&mut mem, src, dst, PAGE_SIZE as u64)
            .unwrap();

        // Parent writes: refcount 2, so it must move to a private frame.
        space.do_wp_page(&mut mem, src).unwrap();

        let s = space.probe(src).unwrap();
        let d = space.probe(dst).unwrap();
        assert_ne!(s.addr(), d.addr());
        assert!(s.is_writable());
        assert!(!d.is_writable());
        assert_eq!(d.addr(), Some(page));
        assert_eq!(mem.ref_count(page), 1);
        let new_page = s.addr().unwrap();
        assert_eq!(mem.ref_count(new_page), 1);
        assert_eq!(unsafe { new_page.as_ptr::<u64>().read() }, 0xDEAD_BEEF);
    }

    #[test]
    fn cow_write_as_sole_owner_flips_in_place() {
        let arena = PhysArena::new(32);
        let mut mem = arena.frame_map();
        let space = AddressSpace::new(&mut mem).unwrap();

        let page = mem.get_free_page().unwrap();
        let src = VirtualAddress::new(WINDOW);
        let dst = VirtualAddress::new(2 * WINDOW);
        space.put_page(&mut mem, page, src).unwrap();
        space
            .copy_page_tables(&mut mem, src, dst, PAGE_SIZE as u64)
            .unwrap();

        // Child faults first while the frame is shared: gets a copy.
        space.do_wp_page(&mut mem, dst).unwrap();
        // Parent now owns the original alone: flips Writable in place.
        space.do_wp_page(&mut mem, src).unwrap();

        let s = space.probe(src).unwrap();
        assert_eq!(s.addr(), Some(page));
        assert!(s.is_writable());
        assert_eq!(mem.ref_count(page), 1);
    }

    #[test]
    fn write_verify_is_noop_for_writable_and_missing() {
        let arena = PhysArena::new(32);
        let mut mem = arena.frame_map();
        let space = AddressSpace::new(&mut mem).unwrap();

        let page = mem.get_free_page().unwrap();
        let vaddr = VirtualAddress::new(WINDOW);
        space.put_page(&mut mem, page, vaddr).unwrap();
        let before = space.probe(vaddr).unwrap();
        space.write_verify(&mut mem, vaddr).unwrap();
        assert_eq!(space.probe(vaddr).unwrap(), before);

        // Unmapped address: nothing to do, nothing allocated.
        let free = mem.count_free();
        space
            .write_verify(&mut mem, VirtualAddress::new(3 * WINDOW))
            .unwrap();
        assert_eq!(mem.count_free(), free);
    }

    #[test]
    fn do_no_page_maps_fresh_writable_frame() {
        let arena = PhysArena::new(32);
        let mut mem = arena.frame_map();
        let space = AddressSpace::new(&mut mem).unwrap();

        let vaddr = VirtualAddress::new(WINDOW + 0x3000);
        space.do_no_page(&mut mem, vaddr).unwrap();
        let entry = space.probe(vaddr).unwrap();
        assert!(entry.is_writable());
        let page = entry.addr().unwrap();
        assert_eq!(mem.ref_count(page), 1);
    }

    #[test]
    fn clone_out_of_memory_leaves_partial_state_for_caller() {
        // 5 frames: root + source pt chain (3) + leaf, leaving none for
        // the destination's page table.
        let arena = PhysArena::new(5);
        let mut mem = arena.frame_map();
        let space = AddressSpace::new(&mut mem).unwrap();

        let page = mem.get_free_page().unwrap();
        let src = VirtualAddress::new(WINDOW);
        let dst = VirtualAddress::new(2 * WINDOW);
        space.put_page(&mut mem, page, src).unwrap();

        let err = space
            .copy_page_tables(&mut mem, src, dst, PAGE_SIZE as u64)
            .unwrap_err();
        assert_eq!(err, KernelError::OutOfMemory);

        // Caller contract: tear the partial destination down.
        space.free_page_tables(&mut mem, dst, PAGE_SIZE as u64);
    }

    #[test]
    #[should_panic(expected = "wrong alignment")]
    fn misaligned_free_panics() {
        let arena = PhysArena::new(8);
        let mut mem = arena.frame_map();
        let space = AddressSpace::new(&mut mem).unwrap();
        space.free_page_tables(&mut mem, VirtualAddress::new(0x1000), PAGE_SIZE as u64);
    }

    #[test]
    #[should_panic(expected = "swapper memory space")]
    fn freeing_low_space_panics() {
        let arena = PhysArena::new(8);
        let mut mem = arena.frame_map();
        let space = AddressSpace::new(&mut mem).unwrap();
        space.free_page_tables(&mut mem, VirtualAddress::new(0), PAGE_SIZE as u64);
    }

    #[test]
    #[should_panic(expected = "wrong alignment")]
    fn misaligned_clone_panics() {
        let arena = PhysArena::new(8);
        let mut mem = arena.frame_map();
        let space = AddressSpace::new(&mut mem).unwrap();
        let _ = space.copy_page_tables(
            &mut mem,
            VirtualAddress::new(0x1000),
            VirtualAddress::new(WINDOW),
            PAGE_SIZE as u64,
        );
    }
}
