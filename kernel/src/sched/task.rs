//! Task descriptor
//!
//! One task owns one 4 KiB frame: the descriptor sits at the low end and
//! the kernel stack grows down from the frame's top. The descriptor
//! carries everything the scheduler, fork and the syscall layer touch;
//! the filesystem fields are handles into the external collaborator.

use core::ptr::NonNull;

use crate::arch::x86_64::context::{FpuState, KernelContext};
use crate::arch::x86_64::gdt::{
    descriptor_base, descriptor_limit, set_descriptor_base, USER_CODE, USER_DATA,
};
use crate::fs::{FileRef, InodeRef, NR_OPEN};
use crate::mm::{VirtualAddress, PAGE_SIZE};
use crate::process::signal_delivery::{SigSet, NSIG};

/// Scheduling states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Runnable (or actually on the CPU).
    Running,
    /// Asleep, wakeable by a signal.
    InterruptibleSleep,
    /// Asleep until explicitly woken.
    UninterruptibleSleep,
    /// Exited, waiting for the father to reap.
    Zombie,
    /// Stopped by job control.
    Stopped,
}

/// Task descriptor. Lives at the bottom of the task's kernel-stack frame.
#[repr(C)]
pub struct Task {
    // Scheduling
    pub state: TaskState,
    /// Remaining time quantum in ticks.
    pub counter: i64,
    /// Quantum refill value.
    pub priority: i64,
    pub signal: SigSet,
    pub sig_restorer: VirtualAddress,
    pub sig_fn: [VirtualAddress; NSIG],

    // Identity and lineage
    pub exit_code: i32,
    pub end_code: u64,
    pub end_data: u64,
    pub brk: u64,
    pub start_stack: u64,
    pub pid: i64,
    pub father: i64,
    pub pgrp: i64,
    pub session: i64,
    pub leader: bool,
    pub uid: u16,
    pub euid: u16,
    pub suid: u16,
    pub gid: u16,
    pub egid: u16,
    pub sgid: u16,

    // Accounting
    /// Alarm deadline in jiffies, 0 when unarmed.
    pub alarm: u64,
    pub utime: u64,
    pub stime: u64,
    pub cutime: u64,
    pub cstime: u64,
    pub start_time: u64,
    pub used_math: bool,

    // Filesystem view (external collaborator's types)
    pub tty: i32,
    pub umask: u16,
    pub pwd: Option<InodeRef>,
    pub root: Option<InodeRef>,
    pub close_on_exec: u32,
    pub filp: [Option<FileRef>; NR_OPEN],

    /// Per-task LDT: null, code, data/stack. The GDT holds a descriptor
    /// pointing at this array for each live slot.
    pub ldt: [u64; 3],

    /// Saved kernel context for the switch primitive.
    pub thread: KernelContext,

    /// FXSAVE area for the lazy FPU switch.
    pub i387: FpuState,
}

/// Minimum kernel stack headroom above the descriptor within the frame.
const MIN_KERNEL_STACK: usize = 2048;
const _: () = assert!(core::mem::size_of::<Task>() + MIN_KERNEL_STACK <= PAGE_SIZE);

impl Task {
    /// The idle task (slot 0): flat segments at base 0, quantum 15/15,
    /// no father, no tty. It exists for the life of the system.
    pub fn idle() -> Self {
        Self {
            state: TaskState::Running,
            counter: 15,
            priority: 15,
            signal: SigSet::empty(),
            sig_restorer: VirtualAddress::new(0),
            sig_fn: [VirtualAddress::new(0); NSIG],
            exit_code: 0,
            end_code: 0,
            end_data: 0,
            brk: 0,
            start_stack: crate::process::TASK_WINDOW,
            pid: 0,
            father: -1,
            pgrp: 0,
            session: 0,
            leader: false,
            uid: 0,
            euid: 0,
            suid: 0,
            gid: 0,
            egid: 0,
            sgid: 0,
            alarm: 0,
            utime: 0,
            stime: 0,
            cutime: 0,
            cstime: 0,
            start_time: 0,
            used_math: false,
            tty: -1,
            umask: 0o133,
            pwd: None,
            root: None,
            close_on_exec: 0,
            filp: [None; NR_OPEN],
            ldt: [0, USER_CODE, USER_DATA],
            thread: KernelContext::new(),
            i387: FpuState::new(),
        }
    }

    /// Base of the code segment (labels the task's virtual window).
    pub fn code_base(&self) -> u64 {
        descriptor_base(self.ldt[1])
    }

    /// Base of the data/stack segment.
    pub fn data_base(&self) -> u64 {
        descriptor_base(self.ldt[2])
    }

    pub fn set_code_base(&mut self, base: u64) {
        set_descriptor_base(&mut self.ldt[1], base);
    }

    pub fn set_data_base(&mut self, base: u64) {
        set_descriptor_base(&mut self.ldt[2], base);
    }

    /// Byte limit of the code segment.
    pub fn code_limit(&self) -> u64 {
        segment_byte_limit(self.ldt[1])
    }

    /// Byte limit of the data segment.
    pub fn data_limit(&self) -> u64 {
        segment_byte_limit(self.ldt[2])
    }

    /// Top of the kernel stack colocated with this descriptor.
    pub fn stack_top(task: *const Task) -> u64 {
        task as u64 + PAGE_SIZE as u64
    }
}

/// Byte limit of a legacy descriptor, honoring the granularity bit.
fn segment_byte_limit(desc: u64) -> u64 {
    let raw = descriptor_limit(desc);
    if desc & (1 << 55) != 0 {
        (raw + 1) << 12
    } else {
        raw + 1
    }
}

/// Shared pointer to a task descriptor.
///
/// Tasks live in frames (or the idle task's static page), never move, and
/// are freed only by `release` after the slot is cleared; the single-CPU
/// interrupt discipline serializes all access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPtr(NonNull<Task>);

// SAFETY: see type docs; aliasing is governed by the interrupt discipline,
// not by Rust threads.
unsafe impl Send for TaskPtr {}
unsafe impl Sync for TaskPtr {}

impl TaskPtr {
    pub fn new(ptr: NonNull<Task>) -> Self {
        Self(ptr)
    }

    pub fn from_raw(ptr: *mut Task) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(&self) -> *mut Task {
        self.0.as_ptr()
    }

    /// Borrow the task.
    ///
    /// # Safety
    /// Caller must hold the interrupt discipline and not alias a `&mut`.
    pub unsafe fn get<'a>(&self) -> &'a Task {
        unsafe { &*self.0.as_ptr() }
    }

    /// Borrow the task mutably.
    ///
    /// # Safety
    /// Caller must hold the interrupt discipline; no other live borrow.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut<'a>(&self) -> &'a mut Task {
        unsafe { &mut *self.0.as_ptr() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_fits_its_frame_with_stack_headroom() {
        assert!(core::mem::size_of::<Task>() + MIN_KERNEL_STACK <= PAGE_SIZE);
    }

    #[test]
    fn idle_task_shape() {
        let idle = Task::idle();
        assert_eq!(idle.state, TaskState::Running);
        assert_eq!(idle.counter, 15);
        assert_eq!(idle.priority, 15);
        assert_eq!(idle.pid, 0);
        assert_eq!(idle.father, -1);
        assert_eq!(idle.code_base(), 0);
        assert_eq!(idle.data_base(), 0);
        // Flat 4 GiB segments
        assert_eq!(idle.code_limit(), 1 << 32);
        assert_eq!(idle.data_limit(), 1 << 32);
    }

    #[test]
    fn segment_base_relabeling() {
        let mut task = Task::idle();
        task.set_code_base(0x0400_0000);
        task.set_data_base(0x0400_0000);
        assert_eq!(task.code_base(), 0x0400_0000);
        assert_eq!(task.data_base(), 0x0400_0000);
        // Limits survive rebasing.
        assert_eq!(task.data_limit(), 1 << 32);
    }
}
