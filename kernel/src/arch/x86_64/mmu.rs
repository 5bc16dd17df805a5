//! CR3 access and TLB invalidation

use crate::mm::PhysicalAddress;

/// Read the current page-tree root from CR3.
#[cfg(target_os = "none")]
pub fn read_cr3() -> PhysicalAddress {
    use x86_64::registers::control::Cr3;
    let (frame, _) = Cr3::read();
    PhysicalAddress::new(frame.start_address().as_u64())
}

/// Invalidate all non-global TLB entries by reloading CR3.
#[cfg(target_os = "none")]
pub fn invalidate() {
    x86_64::instructions::tlb::flush_all();
}

#[cfg(not(target_os = "none"))]
pub fn read_cr3() -> PhysicalAddress {
    PhysicalAddress::new(crate::mm::paging::PML4_ADDR)
}

#[cfg(not(target_os = "none"))]
pub fn invalidate() {}
