//! Scheduler
//!
//! Priority-decay timesharing over the task table. Selection picks the
//! Running task with the largest remaining quantum; when every runnable
//! task has exhausted its quantum, all counters refill with
//! `counter/2 + priority`, so tasks that rarely run out (the IO-bound
//! ones) accumulate a sustained boost. Slot 0 idles when nothing else can
//! run.

use super::task::{Task, TaskState};
use crate::process::signal_delivery::{wake_if_signalled, SIGALRM};
use crate::process::table::TaskTable;
use crate::sched::NR_TASKS;

/// One scheduling pass: deliver due alarms, wake signalled interruptible
/// sleepers, pick the next task and dispatch to it.
pub fn schedule_with(table: &mut TaskTable, jiffies: u64) {
    // Signal processing phase.
    for i in 1..NR_TASKS {
        if let Some(ptr) = table.slot(i) {
            // SAFETY: slots hold live tasks; interrupt discipline held.
            let task = unsafe { ptr.get_mut() };
            if task.alarm != 0 && task.alarm < jiffies {
                task.signal.post(SIGALRM);
                task.alarm = 0;
            }
            wake_if_signalled(task);
        }
    }

    // Selection phase.
    let next = loop {
        let mut c: i64 = -1;
        let mut next = 0usize;
        for i in (1..NR_TASKS).rev() {
            if let Some(ptr) = table.slot(i) {
                // SAFETY: as above.
                let task = unsafe { ptr.get() };
                if task.state == TaskState::Running && task.counter > c {
                    c = task.counter;
                    next = i;
                }
            }
        }
        // c == 0 means runnable tasks exist but all quanta are spent;
        // c == -1 means nobody is runnable and the idle task takes over.
        if c != 0 {
            break next;
        }
        for i in 1..NR_TASKS {
            if let Some(ptr) = table.slot(i) {
                // SAFETY: as above.
                let task = unsafe { ptr.get_mut() };
                task.counter = (task.counter >> 1) + task.priority;
            }
        }
    };

    switch_to(table, next);
}

/// Timer tick accounting. Charges the current task, burns one quantum
/// tick, and reschedules on exhaustion, but only when the interrupted
/// context was user mode; the kernel is cooperative within itself.
pub fn do_timer_with(table: &mut TaskTable, from_user_mode: bool, jiffies: u64) {
    {
        // SAFETY: current task is live; interrupt discipline held.
        let current = unsafe { table.current_task_mut() };
        if from_user_mode {
            current.utime += 1;
        } else {
            current.stime += 1;
        }
        current.counter -= 1;
        if current.counter > 0 {
            return;
        }
        current.counter = 0;
        if !from_user_mode {
            return;
        }
    }
    schedule_with(table, jiffies);
}

/// Dispatch to `next`: update the current designation and the global
/// TSS's ring-0 stack pointer, arm the lazy-FPU trap, then swap register
/// state. A no-op when `next` is already current or its slot is empty.
pub fn switch_to(table: &mut TaskTable, next: usize) {
    let Some(next_ptr) = table.slot(next) else {
        return;
    };
    let prev_ptr = table.current();
    if prev_ptr == next_ptr {
        return;
    }
    table.set_current(next);
    crate::arch::x86_64::gdt::set_kernel_stack(Task::stack_top(next_ptr.as_ptr()));
    // Arm the device-not-available trap so the next FP instruction swaps
    // FPU state lazily.
    crate::arch::x86_64::context::set_ts();
    // SAFETY: prev/next descriptors are live and distinct; interrupts are
    // disabled across the swap.
    unsafe {
        crate::arch::x86_64::context::switch_context(
            &mut (*prev_ptr.as_ptr()).thread,
            &(*next_ptr.as_ptr()).thread,
        );
    }
    // Execution resumes here when *prev* is dispatched again. If we are
    // still the most recent FPU user the trap would be spurious.
    if table.last_math() == Some(table.current_index()) {
        crate::arch::x86_64::context::clear_ts();
    }
}

/// Device-not-available trap body: save the previous owner's FPU state,
/// load (or init) the current task's, and take over FPU ownership.
pub fn math_state_restore(table: &mut TaskTable) {
    crate::arch::x86_64::context::clear_ts();
    if let Some(last) = table.last_math() {
        if let Some(ptr) = table.slot(last) {
            // SAFETY: live task; interrupt discipline held.
            unsafe {
                crate::arch::x86_64::context::fxsave(&mut ptr.get_mut().i387);
            }
        }
    }
    let index = table.current_index();
    // SAFETY: current task is live.
    let current = unsafe { table.current_task_mut() };
    if current.used_math {
        // SAFETY: i387 holds a valid image from a previous fxsave.
        unsafe {
            crate::arch::x86_64::context::fxrstor(&current.i387);
        }
    } else {
        crate::arch::x86_64::context::fninit();
        current.used_math = true;
    }
    table.set_last_math(Some(index));
}
