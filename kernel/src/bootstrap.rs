//! Kernel bring-up
//!
//! The boot collaborator (loader + early assembly) lands here with paging
//! identity-mapped, the fixed PML4 in place and interrupts disabled. The
//! ordering below is load-bearing: the clock and console come up before
//! anything can log, the scheduler before the first tick can fire.

use crate::drivers::{console, hd};
use crate::mm::{mem_init, paging_init, PhysicalAddress, HIGH_MEMORY, LOW_MEM};

/// Main kernel initialization. Called exactly once; never returns on bare
/// metal, where it becomes the idle loop of task 0.
pub fn kernel_main() -> ! {
    console::console_init();
    crate::logger::init();
    crate::timer::time_init();

    paging_init(PhysicalAddress::new(crate::mm::paging::PML4_ADDR));
    mem_init(
        PhysicalAddress::new(LOW_MEM),
        PhysicalAddress::new(HIGH_MEMORY),
    );

    // Trap vectors beyond 0x20/0x80 belong to the external trap_init
    // collaborator and are assumed installed by now.
    crate::sched::sched_init();

    crate::fs::buffer_init();
    hd::hd_init();

    log::info!("ferrite: core up, enabling interrupts");
    crate::arch::enable_interrupts();

    // Task 0's idle loop: everything else happens in forked tasks and
    // interrupt context.
    loop {
        crate::arch::idle();
    }
}
