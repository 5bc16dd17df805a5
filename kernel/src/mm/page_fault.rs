//! Page-fault routing
//!
//! The fault entry stub reads CR2 and the hardware error code and lands
//! here with interrupts still disabled. Bit 0 of the error code separates
//! the two cases the core handles: a protection fault on a present page
//! (copy-on-write) and a reference to a missing page (demand allocation).
//! A failed allocation turns into SIGSEGV and task exit.

use super::frame_allocator::FRAME_MAP;
use super::paging::AddressSpace;
use super::VirtualAddress;

/// Error-code bit: fault on a present page (protection violation).
const FAULT_PRESENT: u64 = 1 << 0;

/// Handle a page fault at `address`. Called from the fault stub with
/// interrupts disabled.
pub fn do_page_fault(error_code: u64, address: VirtualAddress) {
    let space = AddressSpace::kernel();
    let result = {
        let mut mem = FRAME_MAP.lock();
        if error_code & FAULT_PRESENT == 0 {
            space.do_no_page(&mut mem, address)
        } else {
            space.do_wp_page(&mut mem, address)
        }
    };
    if result.is_err() {
        log::error!(
            "page fault at {:#x} (error {:#x}): out of memory, killing task",
            address.as_u64(),
            error_code
        );
        crate::process::exit::segv_current();
    }
}
