//! Kernel context and FPU state
//!
//! [`KernelContext`] is the per-task save area the switch primitive works
//! on: the kernel stack pointer plus the callee-saved registers. The
//! System V ABI makes every other register dead across the `__switch_to`
//! call, so this is the entire switchable state; the interrupt frame on
//! the kernel stack carries the rest.

/// Saved kernel execution state, written and read by `__switch_to`.
///
/// Field order is ABI: the assembly addresses these by fixed offsets
/// (rsp at +0x00 through r15 at +0x30). `fs`/`gs` hold thread-local
/// segment bases and are swapped by the caller, not the primitive.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelContext {
    pub rsp: u64, // 0x00
    pub rbx: u64, // 0x08
    pub rbp: u64, // 0x10
    pub r12: u64, // 0x18
    pub r13: u64, // 0x20
    pub r14: u64, // 0x28
    pub r15: u64, // 0x30
    pub fs: u64,  // 0x38
    pub gs: u64,  // 0x40
}

impl KernelContext {
    pub const fn new() -> Self {
        Self {
            rsp: 0,
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            fs: 0,
            gs: 0,
        }
    }
}

/// FXSAVE area (512 bytes, 16-byte aligned).
#[repr(C, align(16))]
#[derive(Clone, Copy)]
pub struct FpuState(pub [u8; 512]);

impl FpuState {
    pub const fn new() -> Self {
        Self([0; 512])
    }
}

impl core::fmt::Debug for FpuState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("FpuState(..)")
    }
}

/// Swap kernel register state: save into `prev`, load from `next`, and
/// return on `next`'s stack. For a freshly forked task the first "return"
/// lands in `ret_from_fork`; for anyone else, at the instruction after
/// their own last `switch_context` call.
///
/// # Safety
/// Interrupts must be disabled; both contexts must be live and `next.rsp`
/// must point at a valid kernel stack whose top word is a return address.
#[cfg(target_os = "none")]
pub unsafe fn switch_context(prev: *mut KernelContext, next: *const KernelContext) {
    unsafe { __switch_to(prev, next) }
}

#[cfg(target_os = "none")]
extern "C" {
    fn __switch_to(prev: *mut KernelContext, next: *const KernelContext);
}

/// Host build: state swap is a no-op so scheduler paths run to completion
/// in a single test thread.
///
/// # Safety
/// No-op; signature kept identical to the bare-metal primitive.
#[cfg(not(target_os = "none"))]
pub unsafe fn switch_context(_prev: *mut KernelContext, _next: *const KernelContext) {}

/// Save the FPU/SSE state with FXSAVE.
///
/// # Safety
/// `state` must be the full 512-byte, 16-byte-aligned save area.
#[cfg(target_os = "none")]
pub unsafe fn fxsave(state: &mut FpuState) {
    unsafe {
        core::arch::asm!("fxsave [{}]", in(reg) state.0.as_mut_ptr(), options(nostack));
    }
}

/// Restore the FPU/SSE state with FXRSTOR.
///
/// # Safety
/// `state` must hold a valid image produced by [`fxsave`].
#[cfg(target_os = "none")]
pub unsafe fn fxrstor(state: &FpuState) {
    unsafe {
        core::arch::asm!("fxrstor [{}]", in(reg) state.0.as_ptr(), options(nostack));
    }
}

/// Reset the FPU to its power-on default.
#[cfg(target_os = "none")]
pub fn fninit() {
    // SAFETY: FNINIT has no memory operands and no failure modes.
    unsafe {
        core::arch::asm!("fninit", options(nostack, preserves_flags));
    }
}

/// Set CR0.TS so the next FP instruction traps (lazy FPU switch).
#[cfg(target_os = "none")]
pub fn set_ts() {
    use x86_64::registers::control::{Cr0, Cr0Flags};
    // SAFETY: flipping TS only arms the device-not-available trap.
    unsafe {
        Cr0::update(|f| f.insert(Cr0Flags::TASK_SWITCHED));
    }
}

/// Clear CR0.TS (the incoming task already owns the FPU).
#[cfg(target_os = "none")]
pub fn clear_ts() {
    use x86_64::registers::control::{Cr0, Cr0Flags};
    // SAFETY: clearing TS only disarms the device-not-available trap.
    unsafe {
        Cr0::update(|f| f.remove(Cr0Flags::TASK_SWITCHED));
    }
}

#[cfg(not(target_os = "none"))]
mod host_stubs {
    use super::FpuState;

    /// # Safety
    /// No-op on the host.
    pub unsafe fn fxsave(_state: &mut FpuState) {}
    /// # Safety
    /// No-op on the host.
    pub unsafe fn fxrstor(_state: &FpuState) {}
    pub fn fninit() {}
    pub fn set_ts() {}
    pub fn clear_ts() {}
}

#[cfg(not(target_os = "none"))]
pub use host_stubs::{clear_ts, fninit, fxrstor, fxsave, set_ts};
