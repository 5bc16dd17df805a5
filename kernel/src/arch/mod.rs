//! Architecture interface
//!
//! The core targets x86_64 long mode. Everything that touches privileged
//! CPU state funnels through here so the rest of the kernel compiles and
//! tests on the host, where these operations become no-ops.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

/// Halt until the next interrupt (idle loop body).
pub fn idle() {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    ::x86_64::instructions::hlt();
    #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
    core::hint::spin_loop();
}

/// Run `f` with interrupts masked. The sole mutual-exclusion primitive for
/// the task table, frame map and descriptor tables on the single CPU.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    {
        ::x86_64::instructions::interrupts::without_interrupts(f)
    }
    #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
    {
        f()
    }
}

/// Invalidate all non-global TLB entries by reloading the page-tree root.
pub fn invalidate_tlb() {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    self::x86_64::mmu::invalidate();
}

/// Enable interrupts. Called once at the end of `kernel_main` setup.
pub fn enable_interrupts() {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    ::x86_64::instructions::interrupts::enable();
}
