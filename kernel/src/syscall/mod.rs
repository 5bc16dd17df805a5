//! System call dispatch
//!
//! The trampoline saves every register in [`SyscallFrame`] order, hands
//! the frame here, and restores it symmetrically. Dispatch indexes a
//! dense 67-slot table in the traditional order; slots whose feature
//! belongs to an external collaborator (filesystem, TTY, exec) hold the
//! `sys_ni` placeholder.
//!
//! Argument convention: syscall number in `rax`, arguments in `rbx`,
//! `rcx`, `rdx`. The return value replaces `rax` in the saved frame.

pub mod info;
pub mod process;
pub mod signal;
pub mod time;

use crate::error::EINVAL;

/// Register image saved by the syscall/interrupt entry and consumed by
/// `copy_process` to prime a child stack. Field order is the stack layout,
/// ascending addresses; the trampoline pushes these in exactly the
/// reverse order. Edit both together or not at all.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallFrame {
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    // CPU interrupt frame
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl SyscallFrame {
    pub const fn zeroed() -> Self {
        // SAFETY: all fields are plain integers; the all-zero image is a
        // valid (if meaningless) frame.
        unsafe { core::mem::zeroed() }
    }
}

/// A syscall handler over the saved register frame.
pub type SyscallFn = fn(&mut SyscallFrame) -> i64;

/// Placeholder for unassigned or collaborator-owned slots.
fn sys_ni(_frame: &mut SyscallFrame) -> i64 {
    crate::error::KernelError::NotImplemented.errno()
}

/// Number of syscall table slots.
pub const NR_SYSCALLS: usize = 67;

/// The dispatch table, dense, in the traditional order.
pub static SYS_CALL_TABLE: [SyscallFn; NR_SYSCALLS] = [
    sys_ni,                // 0  setup (filesystem collaborator)
    process::sys_exit,     // 1  exit
    process::sys_fork,     // 2  fork
    sys_ni,                // 3  read
    sys_ni,                // 4  write
    sys_ni,                // 5  open
    sys_ni,                // 6  close
    process::sys_waitpid,  // 7  waitpid
    sys_ni,                // 8  creat
    sys_ni,                // 9  link
    sys_ni,                // 10 unlink
    sys_ni,                // 11 execve
    sys_ni,                // 12 chdir
    time::sys_time,        // 13 time
    sys_ni,                // 14 mknod
    sys_ni,                // 15 chmod
    sys_ni,                // 16 chown
    sys_ni,                // 17 break
    sys_ni,                // 18 stat
    sys_ni,                // 19 lseek
    info::sys_getpid,      // 20 getpid
    sys_ni,                // 21 mount
    sys_ni,                // 22 umount
    info::sys_setuid,      // 23 setuid
    info::sys_getuid,      // 24 getuid
    time::sys_stime,       // 25 stime
    sys_ni,                // 26 ptrace
    signal::sys_alarm,     // 27 alarm
    sys_ni,                // 28 fstat
    process::sys_pause,    // 29 pause
    sys_ni,                // 30 utime
    sys_ni,                // 31 stty
    sys_ni,                // 32 gtty
    sys_ni,                // 33 access
    process::sys_nice,     // 34 nice
    sys_ni,                // 35 ftime
    sys_ni,                // 36 sync
    signal::sys_kill,      // 37 kill
    sys_ni,                // 38 rename
    sys_ni,                // 39 mkdir
    sys_ni,                // 40 rmdir
    sys_ni,                // 41 dup
    sys_ni,                // 42 pipe
    sys_ni,                // 43 times
    sys_ni,                // 44 prof
    process::sys_brk,      // 45 brk
    info::sys_setgid,      // 46 setgid
    info::sys_getgid,      // 47 getgid
    signal::sys_signal,    // 48 signal
    info::sys_geteuid,     // 49 geteuid
    info::sys_getegid,     // 50 getegid
    sys_ni,                // 51 acct
    sys_ni,                // 52 phys
    sys_ni,                // 53 lock
    sys_ni,                // 54 ioctl
    sys_ni,                // 55 fcntl
    sys_ni,                // 56 mpx
    info::sys_setpgid,     // 57 setpgid
    sys_ni,                // 58 ulimit
    sys_ni,                // 59 uname
    info::sys_umask,       // 60 umask
    sys_ni,                // 61 chroot
    sys_ni,                // 62 ustat
    sys_ni,                // 63 dup2
    info::sys_getppid,     // 64 getppid
    info::sys_getpgrp,     // 65 getpgrp
    info::sys_setsid,      // 66 setsid
];

/// Syscall entry body: bounds-check, dispatch, and fold the result back
/// into the saved `rax`.
#[no_mangle]
pub extern "C" fn do_system_call(frame: *mut SyscallFrame) {
    // SAFETY: the entry stub hands us the live frame it just built.
    let frame = unsafe { &mut *frame };
    let nr = frame.rax as usize;
    let ret = if nr < NR_SYSCALLS {
        SYS_CALL_TABLE[nr](frame)
    } else {
        -EINVAL
    };
    frame.rax = ret as u64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn frame_layout_matches_trampoline_pushes() {
        // The entry stub builds this struct with pushes; any drift here
        // breaks fork's child stack image.
        assert_eq!(offset_of!(SyscallFrame, ds), 0x00);
        assert_eq!(offset_of!(SyscallFrame, gs), 0x18);
        assert_eq!(offset_of!(SyscallFrame, rax), 0x20);
        assert_eq!(offset_of!(SyscallFrame, rbp), 0x50);
        assert_eq!(offset_of!(SyscallFrame, r15), 0x90);
        assert_eq!(offset_of!(SyscallFrame, rip), 0x98);
        assert_eq!(offset_of!(SyscallFrame, ss), 0xB8);
        assert_eq!(size_of::<SyscallFrame>(), 0xC0);
    }

    #[test]
    fn out_of_range_numbers_are_rejected() {
        let mut frame = SyscallFrame::zeroed();
        frame.rax = NR_SYSCALLS as u64;
        do_system_call(&mut frame);
        assert_eq!(frame.rax as i64, -EINVAL);
    }

    #[test]
    fn placeholder_slots_return_enosys() {
        let mut frame = SyscallFrame::zeroed();
        frame.rax = 11; // execve belongs to the loader collaborator
        do_system_call(&mut frame);
        assert_eq!(frame.rax as i64, -crate::error::ENOSYS);
    }
}
