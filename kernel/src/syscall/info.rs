//! Identity and session syscalls
//!
//! One-liners over the current task's descriptor fields. Only the
//! scheduler mutates scheduling state; these touch identity only.

use crate::error::{errno_return, KernelError};
use crate::process::table::with_task_table;
use crate::syscall::SyscallFrame;

pub fn sys_getpid(_frame: &mut SyscallFrame) -> i64 {
    // SAFETY: current task is live under the table lock.
    with_task_table(|t| unsafe { t.current_task() }.pid)
}

pub fn sys_getppid(_frame: &mut SyscallFrame) -> i64 {
    // SAFETY: as above.
    with_task_table(|t| unsafe { t.current_task() }.father)
}

pub fn sys_getuid(_frame: &mut SyscallFrame) -> i64 {
    // SAFETY: as above.
    with_task_table(|t| unsafe { t.current_task() }.uid as i64)
}

pub fn sys_geteuid(_frame: &mut SyscallFrame) -> i64 {
    // SAFETY: as above.
    with_task_table(|t| unsafe { t.current_task() }.euid as i64)
}

pub fn sys_getgid(_frame: &mut SyscallFrame) -> i64 {
    // SAFETY: as above.
    with_task_table(|t| unsafe { t.current_task() }.gid as i64)
}

pub fn sys_getegid(_frame: &mut SyscallFrame) -> i64 {
    // SAFETY: as above.
    with_task_table(|t| unsafe { t.current_task() }.egid as i64)
}

/// Root may become anyone; anyone else only what their real or saved id
/// already allows.
pub fn sys_setuid(frame: &mut SyscallFrame) -> i64 {
    let uid = frame.rbx as u16;
    with_task_table(|t| {
        // SAFETY: current task is live under the table lock.
        let task = unsafe { t.current_task_mut() };
        if task.euid == 0 {
            task.uid = uid;
            task.euid = uid;
            task.suid = uid;
            0
        } else if uid == task.uid || uid == task.suid {
            task.euid = uid;
            0
        } else {
            KernelError::PermissionDenied.errno()
        }
    })
}

pub fn sys_setgid(frame: &mut SyscallFrame) -> i64 {
    let gid = frame.rbx as u16;
    with_task_table(|t| {
        // SAFETY: as above.
        let task = unsafe { t.current_task_mut() };
        if task.euid == 0 {
            task.gid = gid;
            task.egid = gid;
            task.sgid = gid;
            0
        } else if gid == task.gid || gid == task.sgid {
            task.egid = gid;
            0
        } else {
            KernelError::PermissionDenied.errno()
        }
    })
}

/// Move a task (self when `pid` is 0) into a process group. A session
/// leader's group is fixed.
pub fn sys_setpgid(frame: &mut SyscallFrame) -> i64 {
    let pid = frame.rbx as i64;
    let pgid = frame.rcx as i64;
    errno_return(with_task_table(|t| {
        // SAFETY: current task is live under the table lock.
        let my_pid = unsafe { t.current_task() }.pid;
        let target_pid = if pid == 0 { my_pid } else { pid };
        let (_, ptr) = t
            .find_by_pid(target_pid)
            .ok_or(KernelError::NoSuchProcess)?;
        // SAFETY: live task from the table.
        let task = unsafe { ptr.get_mut() };
        if task.leader {
            return Err(KernelError::PermissionDenied);
        }
        task.pgrp = if pgid == 0 { target_pid } else { pgid };
        Ok(0)
    }))
}

pub fn sys_getpgrp(_frame: &mut SyscallFrame) -> i64 {
    // SAFETY: current task is live under the table lock.
    with_task_table(|t| unsafe { t.current_task() }.pgrp)
}

/// Become a session (and group) leader, detached from any tty.
pub fn sys_setsid(frame: &mut SyscallFrame) -> i64 {
    let _ = frame;
    errno_return(with_task_table(|t| {
        // SAFETY: current task is live under the table lock.
        let task = unsafe { t.current_task_mut() };
        if task.leader {
            return Err(KernelError::PermissionDenied);
        }
        task.leader = true;
        task.session = task.pid;
        task.pgrp = task.pid;
        task.tty = -1;
        Ok(task.pgrp)
    }))
}

/// Set the file-creation mask, returning the old one.
pub fn sys_umask(frame: &mut SyscallFrame) -> i64 {
    let mask = frame.rbx as u16;
    with_task_table(|t| {
        // SAFETY: current task is live under the table lock.
        let task = unsafe { t.current_task_mut() };
        let old = task.umask;
        task.umask = mask & 0o777;
        old as i64
    })
}
