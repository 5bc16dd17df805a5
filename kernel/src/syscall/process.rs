//! Process syscalls: fork, exit, waitpid, pause, nice, brk

use crate::error::errno_return;
use crate::mm::frame_allocator::FRAME_MAP;
use crate::mm::paging::AddressSpace;
use crate::process::exit::{do_exit_with, waitpid_blocking};
use crate::process::fork::copy_process;
use crate::process::table::with_task_table;
use crate::sched::scheduler::schedule_with;
use crate::sched::TaskState;
use crate::syscall::SyscallFrame;

/// fork(2): child PID to the parent; the child wakes in `ret_from_fork`
/// with 0 in this same slot.
pub fn sys_fork(frame: &mut SyscallFrame) -> i64 {
    with_task_table(|table| {
        let nr = match table.find_empty_process() {
            Ok(nr) => nr,
            Err(e) => return e.errno(),
        };
        let space = AddressSpace::kernel();
        let mut mem = FRAME_MAP.lock();
        let mut gdt = crate::arch::x86_64::gdt::GDT.lock();
        errno_return(copy_process(
            table,
            &mut mem,
            &space,
            &mut gdt,
            nr,
            frame,
            crate::timer::jiffies(),
        ))
    })
}

/// exit(2). On bare metal this never returns to the caller; the zombie
/// waits for its father. The frame-map lock is dropped before the final
/// schedule so the next task can fault freely.
pub fn sys_exit(frame: &mut SyscallFrame) -> i64 {
    let code = frame.rbx as i32;
    with_task_table(|table| {
        {
            let space = AddressSpace::kernel();
            let mut mem = FRAME_MAP.lock();
            do_exit_with(table, &mut mem, &space, code);
        }
        schedule_with(table, crate::timer::jiffies());
    });
    0
}

/// waitpid(2): args pid, status pointer, options.
pub fn sys_waitpid(frame: &mut SyscallFrame) -> i64 {
    let pid = frame.rbx as i64;
    let stat_addr = frame.rcx;
    let options = frame.rdx as i64;
    with_task_table(|table| errno_return(waitpid_blocking(table, pid, stat_addr, options)))
}

/// pause(2): interruptible sleep until a signal.
pub fn sys_pause(_frame: &mut SyscallFrame) -> i64 {
    with_task_table(|table| {
        // SAFETY: current task is live under the table lock.
        unsafe { table.current_task_mut() }.state = TaskState::InterruptibleSleep;
        schedule_with(table, crate::timer::jiffies());
    });
    0
}

/// nice(2): shed priority; the refill value may only shrink, never hit 0.
pub fn sys_nice(frame: &mut SyscallFrame) -> i64 {
    let increment = frame.rbx as i64;
    with_task_table(|table| {
        // SAFETY: current task is live under the table lock.
        let task = unsafe { table.current_task_mut() };
        if task.priority - increment > 0 {
            task.priority -= increment;
        }
    });
    0
}

/// brk(2): move the data break inside the task's window. Out-of-range
/// requests are ignored and the current break is reported either way;
/// fresh pages appear on demand through the no-page fault.
pub fn sys_brk(frame: &mut SyscallFrame) -> i64 {
    let end_data_seg = frame.rbx;
    with_task_table(|table| {
        // SAFETY: current task is live under the table lock.
        let task = unsafe { table.current_task_mut() };
        if end_data_seg >= task.end_code
            && end_data_seg < task.start_stack.saturating_sub(16384)
        {
            task.brk = end_data_seg;
        }
        task.brk as i64
    })
}
