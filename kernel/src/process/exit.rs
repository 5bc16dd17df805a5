//! Exit and reaping
//!
//! `do_exit` tears the task's window down frame-by-frame (refcounts
//! respected), releases its filesystem handles, goes Zombie and tells the
//! father; the caller then schedules away with no frame-map or GDT lock
//! held. The descriptor itself survives until the father reaps it in
//! `sys_waitpid`; `release` then frees the frame and clears the slot.

use crate::arch::x86_64::gdt::GdtImage;
use crate::error::{KernelError, Result};
use crate::mm::frame_allocator::{FrameMap, FRAME_MAP};
use crate::mm::paging::AddressSpace;
use crate::mm::user_validation::verify_area;
use crate::mm::{PhysicalAddress, VirtualAddress};
use crate::process::signal_delivery::{SIGCHLD, SIGSEGV};
use crate::process::table::{with_task_table, TaskTable};
use crate::process::TASK_WINDOW;
use crate::sched::scheduler::schedule_with;
use crate::sched::{TaskState, NR_TASKS};

/// `waitpid` option: return 0 instead of blocking.
pub const WNOHANG: i64 = 1;

/// Terminate the current task with `code`: release its window and its
/// filesystem handles, go Zombie, orphan its children to init and signal
/// the father. The caller must reschedule afterwards, with the frame-map
/// lock already dropped, since the next task may fault.
pub fn do_exit_with(
    table: &mut TaskTable,
    mem: &mut FrameMap,
    space: &AddressSpace,
    code: i32,
) {
    let index = table.current_index();
    if index == 0 {
        panic!("task[0] trying to exit");
    }
    let current = table.current();
    // SAFETY: current task is live; interrupt discipline held.
    let task = unsafe { current.get_mut() };

    let base = task.data_base();
    let limit = task.data_limit().min(TASK_WINDOW);
    space.free_page_tables(mem, VirtualAddress::new(base), limit);

    for slot in task.filp.iter_mut() {
        if let Some(file) = slot.take() {
            // SAFETY: handle was live in the fd table; discipline held.
            unsafe {
                crate::fs::file_put(file);
            }
        }
    }
    if let Some(inode) = task.pwd.take() {
        // SAFETY: as above.
        unsafe {
            crate::fs::inode_put(inode);
        }
    }
    if let Some(inode) = task.root.take() {
        // SAFETY: as above.
        unsafe {
            crate::fs::inode_put(inode);
        }
    }

    task.state = TaskState::Zombie;
    task.exit_code = code;

    let my_pid = task.pid;
    let father_pid = task.father;
    for i in 1..NR_TASKS {
        if i == index {
            continue;
        }
        if let Some(ptr) = table.slot(i) {
            // SAFETY: live task; discipline held.
            let other = unsafe { ptr.get_mut() };
            if other.father == my_pid {
                // Orphans go to init.
                other.father = 1;
            }
        }
    }
    if let Some((_, father)) = table.find_by_pid(father_pid) {
        // SAFETY: live task; discipline held.
        unsafe { father.get_mut() }.signal.post(SIGCHLD);
    }
}

/// Free a reaped task: descriptor frame back to the allocator, slot and
/// LDT descriptor cleared. Never called on slot 0.
pub fn release(table: &mut TaskTable, mem: &mut FrameMap, gdt: &mut GdtImage, index: usize) {
    if let Some(ptr) = table.slot(index) {
        table.clear_slot(index);
        gdt.clear_ldt_desc(index);
        mem.free_page(PhysicalAddress::new(ptr.as_ptr() as u64));
    }
}

/// Does `child` match a waitpid `pid` argument from `current`?
fn wait_matches(pid: i64, child_pgrp: i64, child_pid: i64, current_pgrp: i64) -> bool {
    if pid > 0 {
        child_pid == pid
    } else if pid == 0 {
        child_pgrp == current_pgrp
    } else if pid < -1 {
        child_pgrp == -pid
    } else {
        true
    }
}

/// One reap attempt, never blocking. `Ok(Some(pid))` when a Zombie child
/// was reaped (its times folded into the caller's `cutime`/`cstime`, its
/// exit code stored through `stat_addr` when non-zero); `Ok(None)` when
/// matching children exist but none has exited; `Err(NoChild)` otherwise.
pub fn try_wait(
    table: &mut TaskTable,
    mem: &mut FrameMap,
    space: &AddressSpace,
    gdt: &mut GdtImage,
    pid: i64,
    stat_addr: u64,
) -> Result<Option<i64>> {
    let index = table.current_index();
    // SAFETY: current task is live.
    let (my_pid, my_pgrp, my_base) = {
        let current = unsafe { table.current_task() };
        (current.pid, current.pgrp, current.data_base())
    };

    let mut have_child = false;
    let mut zombie: Option<usize> = None;
    for i in 1..NR_TASKS {
        if i == index {
            continue;
        }
        let Some(ptr) = table.slot(i) else { continue };
        // SAFETY: live task; discipline held.
        let child = unsafe { ptr.get() };
        if child.father != my_pid || !wait_matches(pid, child.pgrp, child.pid, my_pgrp) {
            continue;
        }
        if child.state == TaskState::Zombie {
            zombie = Some(i);
            break;
        }
        have_child = true;
    }

    let Some(slot) = zombie else {
        return if have_child {
            Ok(None)
        } else {
            Err(KernelError::NoChild)
        };
    };

    let ptr = match table.slot(slot) {
        Some(p) => p,
        None => unreachable!(),
    };
    // SAFETY: live zombie; discipline held.
    let child = unsafe { ptr.get() };
    let (child_pid, code, utime, stime) = (
        child.pid,
        child.exit_code,
        child.utime + child.cutime,
        child.stime + child.cstime,
    );
    // Make the status page writable before any state is consumed, so a
    // bad pointer fails without losing the child.
    if stat_addr != 0 {
        verify_area(space, mem, VirtualAddress::new(my_base), stat_addr, 4)?;
    }
    {
        // SAFETY: current task is live.
        let current = unsafe { table.current_task_mut() };
        current.cutime += utime;
        current.cstime += stime;
    }
    release(table, mem, gdt, slot);
    if stat_addr != 0 {
        // SAFETY: verify_area made the page privately writable; identity
        // mapping makes this a plain store.
        unsafe {
            ((my_base + stat_addr) as *mut i32).write_unaligned(code);
        }
    }
    Ok(Some(child_pid))
}

/// Blocking wait loop over [`try_wait`], used by `sys_waitpid`. The
/// frame-map and GDT locks are scoped to each attempt so the sleep in
/// between holds only the task-table baton.
pub fn waitpid_blocking(
    table: &mut TaskTable,
    pid: i64,
    stat_addr: u64,
    options: i64,
) -> Result<i64> {
    loop {
        let attempt = {
            let space = AddressSpace::kernel();
            let mut mem = FRAME_MAP.lock();
            let mut gdt = crate::arch::x86_64::gdt::GDT.lock();
            try_wait(table, &mut mem, &space, &mut gdt, pid, stat_addr)
        };
        if let Some(child_pid) = attempt? {
            return Ok(child_pid);
        }
        if options & WNOHANG != 0 {
            return Ok(0);
        }

        // SAFETY: current task is live.
        unsafe { table.current_task_mut() }.state = TaskState::InterruptibleSleep;
        schedule_with(table, crate::timer::jiffies());
        // SAFETY: current task is live.
        let current = unsafe { table.current_task_mut() };
        current.signal.take(SIGCHLD);
        if !current.signal.is_empty() {
            return Err(KernelError::Interrupted);
        }
    }
}

/// Page-fault boundary helper: the current task hit an unrecoverable
/// memory condition. Post SIGSEGV, exit, and schedule away.
pub fn segv_current() {
    with_task_table(|table| {
        // SAFETY: current task is live.
        unsafe { table.current_task_mut() }.signal.post(SIGSEGV);
        {
            let mut mem = FRAME_MAP.lock();
            do_exit_with(table, &mut mem, &AddressSpace::kernel(), SIGSEGV as i32);
        }
        schedule_with(table, crate::timer::jiffies());
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::testing::PhysArena;
    use crate::process::table::TaskTable;
    use crate::sched::testing::leak_task;
    use crate::sched::Task;
    use crate::syscall::SyscallFrame;

    fn exit_fixture() -> (PhysArena, FrameMap, AddressSpace, GdtImage, TaskTable) {
        let arena = PhysArena::new(64);
        let mut mem = arena.frame_map();
        let space = AddressSpace::new(&mut mem).unwrap();
        let mut table = TaskTable::new();
        table.install_idle(leak_task(Task::idle()));

        let mut parent = Task::idle();
        parent.pid = 10;
        parent.set_code_base(TASK_WINDOW);
        parent.set_data_base(TASK_WINDOW);
        let parent_ptr = leak_task(parent);
        table.set_slot(1, parent_ptr);
        table.set_current(1);
        (arena, mem, space, GdtImage::new(), table)
    }

    fn fork_child(
        table: &mut TaskTable,
        mem: &mut FrameMap,
        space: &AddressSpace,
        gdt: &mut GdtImage,
    ) -> (usize, i64) {
        let frame = SyscallFrame::zeroed();
        let slot = table.find_empty_process().unwrap();
        let pid = crate::process::copy_process(table, mem, space, gdt, slot, &frame, 0).unwrap();
        (slot, pid)
    }

    #[test]
    fn exit_goes_zombie_and_signals_father() {
        let (_arena, mut mem, space, mut gdt, mut table) = exit_fixture();
        let (slot, _pid) = fork_child(&mut table, &mut mem, &space, &mut gdt);

        // Child runs and exits with code 3.
        table.set_current(slot);
        do_exit_with(&mut table, &mut mem, &space, 3);

        let child = unsafe { table.slot(slot).unwrap().get() };
        assert_eq!(child.state, TaskState::Zombie);
        assert_eq!(child.exit_code, 3);
        let parent = unsafe { table.slot(1).unwrap().get() };
        assert!(parent.signal.contains(SIGCHLD));
    }

    #[test]
    fn exit_releases_window_frames() {
        let (_arena, mut mem, space, mut gdt, mut table) = exit_fixture();

        // Parent maps a page, forks, child exits: the shared frame's
        // count must drop back to 1.
        let page = mem.get_free_page().unwrap();
        space
            .put_page(&mut mem, page, VirtualAddress::new(TASK_WINDOW))
            .unwrap();
        let (slot, _pid) = fork_child(&mut table, &mut mem, &space, &mut gdt);
        assert_eq!(mem.ref_count(page), 2);

        table.set_current(slot);
        do_exit_with(&mut table, &mut mem, &space, 0);
        assert_eq!(mem.ref_count(page), 1);
    }

    #[test]
    fn try_wait_reaps_zombie_child() {
        let (_arena, mut mem, space, mut gdt, mut table) = exit_fixture();
        let (slot, pid) = fork_child(&mut table, &mut mem, &space, &mut gdt);

        {
            let child = unsafe { table.slot(slot).unwrap().get_mut() };
            child.utime = 7;
            child.stime = 5;
        }
        table.set_current(slot);
        do_exit_with(&mut table, &mut mem, &space, 42);

        table.set_current(1);
        let mut status: i32 = -1;
        let reaped = try_wait(
            &mut table,
            &mut mem,
            &space,
            &mut gdt,
            -1,
            // Parent's data base is TASK_WINDOW; present the pointer the
            // way user code would, segment-relative.
            (&mut status as *mut i32 as u64).wrapping_sub(TASK_WINDOW),
        )
        .unwrap();
        assert_eq!(reaped, Some(pid));
        assert_eq!(status, 42);
        assert!(table.slot(slot).is_none());
        let parent = unsafe { table.slot(1).unwrap().get() };
        assert_eq!(parent.cutime, 7);
        assert_eq!(parent.cstime, 5);
    }

    #[test]
    fn try_wait_without_children_fails() {
        let (_arena, mut mem, space, mut gdt, mut table) = exit_fixture();
        let err = try_wait(&mut table, &mut mem, &space, &mut gdt, -1, 0).unwrap_err();
        assert_eq!(err, KernelError::NoChild);
    }

    #[test]
    fn try_wait_reports_live_children() {
        let (_arena, mut mem, space, mut gdt, mut table) = exit_fixture();
        let (_slot, _pid) = fork_child(&mut table, &mut mem, &space, &mut gdt);
        let outcome = try_wait(&mut table, &mut mem, &space, &mut gdt, -1, 0).unwrap();
        assert_eq!(outcome, None);
    }

    #[test]
    fn try_wait_filters_by_pid() {
        let (_arena, mut mem, space, mut gdt, mut table) = exit_fixture();
        let (slot, pid) = fork_child(&mut table, &mut mem, &space, &mut gdt);
        table.set_current(slot);
        do_exit_with(&mut table, &mut mem, &space, 0);
        table.set_current(1);

        // Asking for a different PID: the zombie does not match, and no
        // other child exists.
        let err = try_wait(&mut table, &mut mem, &space, &mut gdt, pid + 5, 0).unwrap_err();
        assert_eq!(err, KernelError::NoChild);
        // Asking for it precisely reaps it.
        let reaped = try_wait(&mut table, &mut mem, &space, &mut gdt, pid, 0).unwrap();
        assert_eq!(reaped, Some(pid));
    }

    #[test]
    #[should_panic(expected = "task[0] trying to exit")]
    fn idle_task_must_not_exit() {
        let (_arena, mut mem, space, _gdt, mut table) = exit_fixture();
        table.set_current(0);
        do_exit_with(&mut table, &mut mem, &space, 0);
    }
}
