//! Fork
//!
//! `copy_process` builds a child task in one fresh frame: the descriptor
//! is a byte-wise copy of the parent with identity/accounting overridden,
//! and the kernel stack is primed so the child's very first dispatch
//! unwinds through `ret_from_fork` into user mode with the parent's
//! captured registers, except RAX, which reads 0.

use core::mem::size_of;
use core::ptr::NonNull;

use crate::arch::x86_64::context::{fxsave, KernelContext};
use crate::arch::x86_64::entry::ret_from_fork_addr;
use crate::arch::x86_64::gdt::GdtImage;
use crate::error::{KernelError, Result};
use crate::mm::frame_allocator::FrameMap;
use crate::mm::paging::AddressSpace;
use crate::mm::VirtualAddress;
use crate::process::signal_delivery::SigSet;
use crate::process::table::TaskTable;
use crate::process::TASK_WINDOW;
use crate::sched::{Task, TaskPtr, TaskState};
use crate::syscall::SyscallFrame;

/// Clone the parent's window into slot `nr`'s window, copy-on-write, and
/// relabel the child's segments. The flat segment limit is clamped to the
/// window size; only the parent's own window is ever populated.
fn copy_mem(
    mem: &mut FrameMap,
    space: &AddressSpace,
    nr: usize,
    parent: &Task,
    child: &mut Task,
) -> Result<()> {
    let code_limit = parent.code_limit();
    let data_limit = parent.data_limit();
    let old_code_base = parent.code_base();
    let old_data_base = parent.data_base();
    if old_data_base != old_code_base {
        panic!("We don't support separate I&D");
    }
    if data_limit < code_limit {
        panic!("Bad data_limit");
    }

    let new_base = nr as u64 * TASK_WINDOW;
    child.set_code_base(new_base);
    child.set_data_base(new_base);

    let size = data_limit.min(TASK_WINDOW);
    if let Err(e) = space.copy_page_tables(
        mem,
        VirtualAddress::new(old_data_base),
        VirtualAddress::new(new_base),
        size,
    ) {
        space.free_page_tables(mem, VirtualAddress::new(new_base), size);
        return Err(e);
    }
    Ok(())
}

/// Create a child of the current task in slot `nr` with the PID the table
/// just allocated. `frame` is the parent's register image as captured by
/// the syscall entry. Returns the child's PID, or `-EAGAIN`-class errors
/// with everything rolled back.
#[allow(clippy::too_many_arguments)]
pub fn copy_process(
    table: &mut TaskTable,
    mem: &mut FrameMap,
    space: &AddressSpace,
    gdt: &mut GdtImage,
    nr: usize,
    frame: &SyscallFrame,
    jiffies: u64,
) -> Result<i64> {
    let page = mem.get_free_page().ok_or(KernelError::TryAgain)?;
    let child_ptr = page.as_mut_ptr::<Task>();
    let parent_ptr = table.current().as_ptr();

    // Byte-wise copy of the parent descriptor; the kernel stack above it
    // is NOT copied, it gets purpose-built below.
    // SAFETY: child frame is fresh and big enough (compile-time assert in
    // task.rs); parent descriptor is live.
    unsafe {
        core::ptr::copy_nonoverlapping(parent_ptr as *const Task, child_ptr, 1);
    }
    // SAFETY: just initialized; nothing else references this frame yet.
    let child = unsafe { &mut *child_ptr };
    let pid = table.last_pid();

    // Guard against dispatch until the descriptor is fully primed.
    child.state = TaskState::UninterruptibleSleep;
    child.pid = pid;
    // SAFETY: parent descriptor is live, read-only peek.
    child.father = unsafe { &*parent_ptr }.pid;
    child.counter = child.priority;
    child.signal = SigSet::empty();
    child.alarm = 0;
    child.leader = false; // leadership is not inherited
    child.utime = 0;
    child.stime = 0;
    child.cutime = 0;
    child.cstime = 0;
    child.start_time = jiffies;

    // Prime the kernel stack: the captured frame with the fork return
    // value forced to 0, and ret_from_fork where the switch primitive's
    // ret will look for it.
    let stack_top = Task::stack_top(child_ptr);
    let mut child_frame = *frame;
    child_frame.rax = 0;
    let frame_base = stack_top - size_of::<SyscallFrame>() as u64;
    // SAFETY: the frame image lies inside the child's own stack region.
    unsafe {
        (frame_base as *mut SyscallFrame).write(child_frame);
    }
    let rsp = frame_base - size_of::<u64>() as u64;
    // SAFETY: one word below the frame image, still inside the stack.
    unsafe {
        (rsp as *mut u64).write(ret_from_fork_addr());
    }

    child.thread = KernelContext {
        rsp,
        rbx: frame.rbx,
        rbp: frame.rbp,
        r12: 0,
        r13: 0,
        r14: 0,
        r15: 0,
        fs: frame.fs,
        gs: frame.gs,
    };

    // Parent owns the FPU: its live state, not the stale descriptor copy,
    // is what the child must inherit.
    if table.last_math() == Some(table.current_index()) {
        // SAFETY: child's i387 is a full save area.
        unsafe {
            fxsave(&mut child.i387);
        }
    }

    if copy_mem(mem, space, nr, unsafe { &*parent_ptr }, child).is_err() {
        mem.free_page(page);
        return Err(KernelError::TryAgain);
    }

    // The child shares every open file and both inode handles.
    for file in child.filp.iter().flatten() {
        // SAFETY: inherited handles are live; discipline held.
        unsafe {
            crate::fs::file_get(*file);
        }
    }
    if let Some(pwd) = child.pwd {
        // SAFETY: as above.
        unsafe {
            crate::fs::inode_get(pwd);
        }
    }
    if let Some(root) = child.root {
        // SAFETY: as above.
        unsafe {
            crate::fs::inode_get(root);
        }
    }

    gdt.set_ldt_desc(nr, child.ldt.as_ptr() as u64);

    child.state = TaskState::Running;
    // Publish last: this is the point where the child becomes schedulable.
    let child_task = match NonNull::new(child_ptr) {
        Some(p) => TaskPtr::new(p),
        None => unreachable!(),
    };
    table.set_slot(nr, child_task);
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::testing::PhysArena;
    use crate::sched::testing::leak_task;

    fn syscall_frame() -> SyscallFrame {
        SyscallFrame {
            ds: 0x2B,
            es: 0x2B,
            fs: 0x00,
            gs: 0x00,
            rax: 2, // fork's own syscall number
            rbx: 0x1111,
            rcx: 0x2222,
            rdx: 0x3333,
            rdi: 0x4444,
            rsi: 0x5555,
            rbp: 0x6666,
            r8: 0x88,
            r9: 0x99,
            r10: 0xAA,
            r11: 0xBB,
            r12: 0xCC,
            r13: 0xDD,
            r14: 0xEE,
            r15: 0xFF,
            rip: 0x40_1000,
            cs: 0x33,
            rflags: 0x202,
            rsp: 0x7FFF_F000,
            ss: 0x2B,
        }
    }

    struct ForkFixture {
        arena: PhysArena,
        mem: FrameMap,
        space: AddressSpace,
        gdt: GdtImage,
        table: TaskTable,
    }

    fn fixture(frames: usize) -> ForkFixture {
        let arena = PhysArena::new(frames);
        let mut mem = arena.frame_map();
        let space = AddressSpace::new(&mut mem).unwrap();
        let mut table = TaskTable::new();
        table.install_idle(leak_task(Task::idle()));

        // A parent in slot 1, window-based segments, one mapped page.
        let mut parent = Task::idle();
        parent.pid = 100;
        parent.set_code_base(TASK_WINDOW);
        parent.set_data_base(TASK_WINDOW);
        let parent_ptr = leak_task(parent);
        table.set_slot(1, parent_ptr);
        table.set_current(1);

        ForkFixture {
            arena,
            mem,
            space,
            gdt: GdtImage::new(),
            table,
        }
    }

    fn map_parent_page(fx: &mut ForkFixture) -> crate::mm::PhysicalAddress {
        let page = fx.mem.get_free_page().unwrap();
        fx.space
            .put_page(&mut fx.mem, page, VirtualAddress::new(TASK_WINDOW))
            .unwrap();
        page
    }

    #[test]
    fn child_stack_image_matches_captured_frame_with_rax_zero() {
        let mut fx = fixture(64);
        let frame = syscall_frame();

        let slot = fx.table.find_empty_process().unwrap();
        assert_eq!(slot, 2);
        let pid = copy_process(
            &mut fx.table,
            &mut fx.mem,
            &fx.space,
            &mut fx.gdt,
            slot,
            &frame,
            777,
        )
        .unwrap();

        let child = fx.table.slot(slot).unwrap();
        let child_task = unsafe { child.get() };

        // The stack image: ret_from_fork at the saved rsp, the frame above.
        let rsp = child_task.thread.rsp;
        let ret = unsafe { (rsp as *const u64).read() };
        assert_eq!(ret, ret_from_fork_addr());
        let img = unsafe { &*((rsp + 8) as *const SyscallFrame) };
        assert_eq!(img.rax, 0); // fork() == 0 in the child
        assert_eq!(img.rbx, frame.rbx);
        assert_eq!(img.rcx, frame.rcx);
        assert_eq!(img.r15, frame.r15);
        assert_eq!(img.rip, frame.rip);
        assert_eq!(img.cs, frame.cs);
        assert_eq!(img.rflags, frame.rflags);
        assert_eq!(img.rsp, frame.rsp);
        assert_eq!(img.ss, frame.ss);
        // The image ends exactly at the stack top.
        assert_eq!(
            rsp + 8 + size_of::<SyscallFrame>() as u64,
            Task::stack_top(child.as_ptr())
        );

        // Saved context: callee-saved copied, r12..r15 cleared.
        assert_eq!(child_task.thread.rbx, frame.rbx);
        assert_eq!(child_task.thread.rbp, frame.rbp);
        assert_eq!(child_task.thread.r12, 0);
        assert_eq!(child_task.thread.r15, 0);

        // Identity/accounting overrides.
        assert_eq!(child_task.pid, pid);
        assert_eq!(child_task.father, 100);
        assert_eq!(child_task.state, TaskState::Running);
        assert_eq!(child_task.start_time, 777);
        assert_eq!(child_task.utime, 0);
        assert!(child_task.signal.is_empty());
        assert!(!child_task.leader);
    }

    #[test]
    fn fork_clones_window_copy_on_write() {
        let mut fx = fixture(64);
        let page = map_parent_page(&mut fx);
        let frame = syscall_frame();

        let slot = fx.table.find_empty_process().unwrap();
        copy_process(
            &mut fx.table,
            &mut fx.mem,
            &fx.space,
            &mut fx.gdt,
            slot,
            &frame,
            0,
        )
        .unwrap();

        // Scenario: parent slot 1 at 64 MiB, child slot 2 at 128 MiB.
        assert_eq!(fx.mem.ref_count(page), 2);
        let parent_leaf = fx.space.probe(VirtualAddress::new(TASK_WINDOW)).unwrap();
        let child_leaf = fx
            .space
            .probe(VirtualAddress::new(slot as u64 * TASK_WINDOW))
            .unwrap();
        assert!(!parent_leaf.is_writable());
        assert!(!child_leaf.is_writable());
        assert_eq!(parent_leaf.addr(), Some(page));
        assert_eq!(child_leaf.addr(), Some(page));

        // Child window label moved with the slot.
        let child_task = unsafe { fx.table.slot(slot).unwrap().get() };
        assert_eq!(child_task.data_base(), slot as u64 * TASK_WINDOW);
    }

    #[test]
    fn fork_bumps_file_and_inode_refcounts() {
        let mut fx = fixture(64);
        let frame = syscall_frame();

        let file = std::boxed::Box::leak(std::boxed::Box::new(crate::fs::File {
            count: 1,
            mode: 0,
            pos: 0,
        }));
        let inode = std::boxed::Box::leak(std::boxed::Box::new(crate::fs::Inode {
            count: 1,
            num: 7,
        }));
        {
            let parent = unsafe { fx.table.slot(1).unwrap().get_mut() };
            parent.filp[0] = NonNull::new(file as *mut _);
            parent.filp[3] = NonNull::new(file as *mut _);
            parent.pwd = NonNull::new(inode as *mut _);
            parent.root = NonNull::new(inode as *mut _);
        }

        let slot = fx.table.find_empty_process().unwrap();
        copy_process(
            &mut fx.table,
            &mut fx.mem,
            &fx.space,
            &mut fx.gdt,
            slot,
            &frame,
            0,
        )
        .unwrap();

        // Two fd slots and two inode handles inherited.
        assert_eq!(file.count, 3);
        assert_eq!(inode.count, 3);
    }

    #[test]
    fn fork_out_of_memory_rolls_back() {
        // Six frames: tree root, parent's page plus its three tables, and
        // one left for the child's descriptor; the clone then starves.
        let mut fx = fixture(6);
        let _page = map_parent_page(&mut fx);
        let frame = syscall_frame();

        let slot = fx.table.find_empty_process().unwrap();
        let free_before = fx.mem.count_free();
        let err = copy_process(
            &mut fx.table,
            &mut fx.mem,
            &fx.space,
            &mut fx.gdt,
            slot,
            &frame,
            0,
        )
        .unwrap_err();
        assert_eq!(err, KernelError::TryAgain);
        // The child frame and any partial tables came back.
        assert_eq!(fx.mem.count_free(), free_before);
        assert!(fx.table.slot(slot).is_none());
        let _ = &fx.arena;
    }

    #[test]
    fn fork_publishes_slot_last_with_running_state() {
        let mut fx = fixture(64);
        let frame = syscall_frame();
        let slot = fx.table.find_empty_process().unwrap();
        copy_process(
            &mut fx.table,
            &mut fx.mem,
            &fx.space,
            &mut fx.gdt,
            slot,
            &frame,
            0,
        )
        .unwrap();
        let child = unsafe { fx.table.slot(slot).unwrap().get() };
        assert_eq!(child.state, TaskState::Running);
        // The LDT descriptor pair for the slot is installed.
        let idx = crate::arch::x86_64::gdt::FIRST_LDT_ENTRY + 2 * slot;
        assert_ne!(fx.gdt.entry(idx), 0);
    }
}
