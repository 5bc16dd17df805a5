//! Interrupt and syscall entry trampolines
//!
//! The save order here and the `SyscallFrame` struct in `crate::syscall`
//! are two views of the same layout; `copy_process` builds a child kernel
//! stack by writing a `SyscallFrame` where these pushes would have put
//! one. Edit them together or not at all.
//!
//! Stack image, ascending addresses from the frame pointer handed to the
//! Rust handlers:
//!   ds, es, fs, gs,
//!   rax, rbx, rcx, rdx, rdi, rsi, rbp, r8..r15,
//!   rip, cs, rflags, rsp, ss   (CPU interrupt frame)
//!
//! `ret_from_fork` is the first instruction a forked child ever runs: it
//! releases the task-table baton its parent's schedule pass carried
//! (`schedule_tail`), then falls into the shared register-restore tail.
//! `__switch_to` saves/loads exactly the `KernelContext` fields at their
//! declared offsets and transfers control with its final `ret`.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
core::arch::global_asm!(
    r#"
    .section .text

    .global system_call
    system_call:
        push r15
        push r14
        push r13
        push r12
        push r11
        push r10
        push r9
        push r8
        push rbp
        push rsi
        push rdi
        push rdx
        push rcx
        push rbx
        push rax
        mov eax, gs
        push rax
        mov eax, fs
        push rax
        mov eax, es
        push rax
        mov eax, ds
        push rax
        mov rdi, rsp
        call do_system_call
        jmp ret_from_sys_call

    .global ret_from_fork
    ret_from_fork:
        call schedule_tail

    .global ret_from_sys_call
    ret_from_sys_call:
        pop rax
        mov ds, ax
        pop rax
        mov es, ax
        pop rax
        mov fs, ax
        pop rax
        mov gs, ax
        pop rax
        pop rbx
        pop rcx
        pop rdx
        pop rdi
        pop rsi
        pop rbp
        pop r8
        pop r9
        pop r10
        pop r11
        pop r12
        pop r13
        pop r14
        pop r15
        iretq

    .global timer_interrupt
    timer_interrupt:
        push r15
        push r14
        push r13
        push r12
        push r11
        push r10
        push r9
        push r8
        push rbp
        push rsi
        push rdi
        push rdx
        push rcx
        push rbx
        push rax
        mov eax, gs
        push rax
        mov eax, fs
        push rax
        mov eax, es
        push rax
        mov eax, ds
        push rax
        mov rdi, rsp
        call do_timer_interrupt
        jmp ret_from_sys_call

    .global __switch_to
    __switch_to:
        mov [rdi + 0x00], rsp
        mov [rdi + 0x08], rbx
        mov [rdi + 0x10], rbp
        mov [rdi + 0x18], r12
        mov [rdi + 0x20], r13
        mov [rdi + 0x28], r14
        mov [rdi + 0x30], r15
        mov rsp, [rsi + 0x00]
        mov rbx, [rsi + 0x08]
        mov rbp, [rsi + 0x10]
        mov r12, [rsi + 0x18]
        mov r13, [rsi + 0x20]
        mov r14, [rsi + 0x28]
        mov r15, [rsi + 0x30]
        ret
    "#
);

/// Address of the restore tail a freshly forked child "returns" to.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn ret_from_fork_addr() -> u64 {
    extern "C" {
        fn ret_from_fork();
    }
    ret_from_fork as usize as u64
}

/// Address of the syscall trampoline, for the vector-0x80 gate.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn system_call_addr() -> u64 {
    extern "C" {
        fn system_call();
    }
    system_call as usize as u64
}

/// Address of the timer trampoline, for the vector-0x20 gate.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn timer_interrupt_addr() -> u64 {
    extern "C" {
        fn timer_interrupt();
    }
    timer_interrupt as usize as u64
}

/// Host build: a recognizable sentinel; fork tests assert it lands at the
/// bottom of the primed child stack.
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub fn ret_from_fork_addr() -> u64 {
    0xFEED_FACE_CAFE_0000
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub fn system_call_addr() -> u64 {
    0
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub fn timer_interrupt_addr() -> u64 {
    0
}
