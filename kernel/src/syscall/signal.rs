//! Signal syscalls: signal, kill, alarm

use crate::error::errno_return;
use crate::mm::VirtualAddress;
use crate::process::signal_delivery::{install_handler, kill_with};
use crate::process::table::with_task_table;
use crate::sched::HZ;
use crate::syscall::SyscallFrame;

/// signal(2): install a handler (and its user-mode restorer) for a
/// portable signal; returns the previous handler address.
pub fn sys_signal(frame: &mut SyscallFrame) -> i64 {
    let sig = frame.rbx as u32;
    let handler = VirtualAddress::new(frame.rcx);
    let restorer = VirtualAddress::new(frame.rdx);
    errno_return(with_task_table(|table| {
        // SAFETY: current task is live under the table lock.
        install_handler(unsafe { table.current_task_mut() }, sig, handler, restorer)
    }))
}

/// kill(2): post a signal to a PID (or the caller's group for pid 0).
pub fn sys_kill(frame: &mut SyscallFrame) -> i64 {
    let pid = frame.rbx as i64;
    let sig = frame.rcx as u32;
    errno_return(with_task_table(|table| kill_with(table, pid, sig)))
}

/// alarm(2): arm (or cancel, for 0) the one time-based wake. The deadline
/// lands at `jiffies + HZ * seconds`; SIGALRM posts at the first
/// scheduling pass past it.
pub fn sys_alarm(frame: &mut SyscallFrame) -> i64 {
    let seconds = frame.rbx as i64;
    with_task_table(|table| {
        // SAFETY: current task is live under the table lock.
        let task = unsafe { table.current_task_mut() };
        task.alarm = if seconds > 0 {
            crate::timer::jiffies() + HZ * seconds as u64
        } else {
            0
        };
    });
    seconds
}
