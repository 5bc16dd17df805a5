//! Task table
//!
//! A fixed array of 64 optional task pointers. Slot 0 is the idle task,
//! installed at `sched_init` and never reassigned; slots 1..63 are handed
//! out by `find_empty_process` and cleared by `release`. Exactly one slot
//! is *current* at any time.

use spin::Mutex;

use crate::error::{KernelError, Result};
use crate::sched::{Task, TaskPtr, NR_TASKS};

/// The table, current-task designation and PID counter.
pub struct TaskTable {
    slots: [Option<TaskPtr>; NR_TASKS],
    current: usize,
    last_pid: i64,
    /// Slot of the most recent FPU user, for the lazy FPU switch.
    last_math: Option<usize>,
}

impl TaskTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; NR_TASKS],
            current: 0,
            last_pid: 0,
            last_math: None,
        }
    }

    /// Install the idle task in slot 0 and make it current.
    pub fn install_idle(&mut self, idle: TaskPtr) {
        self.slots[0] = Some(idle);
        self.current = 0;
    }

    pub fn slot(&self, index: usize) -> Option<TaskPtr> {
        self.slots[index]
    }

    /// Publish a task pointer. For fork this is the linearization point;
    /// the descriptor must be fully primed before this call.
    pub fn set_slot(&mut self, index: usize, task: TaskPtr) {
        self.slots[index] = Some(task);
    }

    pub fn clear_slot(&mut self, index: usize) {
        debug_assert!(index != 0, "slot 0 is never cleared");
        self.slots[index] = None;
        if self.last_math == Some(index) {
            self.last_math = None;
        }
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn set_current(&mut self, index: usize) {
        debug_assert!(self.slots[index].is_some());
        self.current = index;
    }

    /// Pointer to the current task. Valid from `sched_init` on.
    pub fn current(&self) -> TaskPtr {
        match self.slots[self.current] {
            Some(t) => t,
            None => panic!("no current task"),
        }
    }

    /// Borrow the current task.
    ///
    /// # Safety
    /// Caller must hold the interrupt discipline and not alias a `&mut`.
    pub unsafe fn current_task(&self) -> &Task {
        unsafe { self.current().get() }
    }

    /// Borrow the current task mutably.
    ///
    /// # Safety
    /// Caller must hold the interrupt discipline; no other live borrow.
    pub unsafe fn current_task_mut(&mut self) -> &mut Task {
        unsafe { self.current().get_mut() }
    }

    pub fn last_math(&self) -> Option<usize> {
        self.last_math
    }

    pub fn set_last_math(&mut self, slot: Option<usize>) {
        self.last_math = slot;
    }

    /// PID assigned by the most recent `find_empty_process`.
    pub fn last_pid(&self) -> i64 {
        self.last_pid
    }

    /// Advance the PID counter to a fresh positive PID (wrapping, skipping
    /// any still in use), then find a free slot. `-EAGAIN` when the table
    /// is full.
    pub fn find_empty_process(&mut self) -> Result<usize> {
        'retry: loop {
            self.last_pid = self.last_pid.wrapping_add(1);
            if self.last_pid < 0 {
                self.last_pid = 1;
            }
            for slot in self.slots.iter().flatten() {
                // SAFETY: slots hold live tasks; read-only peek at the pid.
                if unsafe { slot.get() }.pid == self.last_pid {
                    continue 'retry;
                }
            }
            break;
        }
        for (i, slot) in self.slots.iter().enumerate().skip(1) {
            if slot.is_none() {
                return Ok(i);
            }
        }
        Err(KernelError::TryAgain)
    }

    /// Locate a task by PID.
    pub fn find_by_pid(&self, pid: i64) -> Option<(usize, TaskPtr)> {
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(ptr) = slot {
                // SAFETY: live task, read-only peek.
                if unsafe { ptr.get() }.pid == pid {
                    return Some((i, *ptr));
                }
            }
        }
        None
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Global task table instance
pub static TASK_TABLE: Mutex<TaskTable> = Mutex::new(TaskTable::new());

/// Run `f` on the task table under the interrupt discipline.
///
/// The lock behaves as a baton across context switches: a task that
/// suspends inside `f` (via `schedule`) leaves the lock held, and the
/// task dispatched next releases it when its own `with_task_table`
/// section completes. Freshly forked children release it through
/// [`schedule_tail`] instead.
pub fn with_task_table<R>(f: impl FnOnce(&mut TaskTable) -> R) -> R {
    crate::arch::without_interrupts(|| f(&mut TASK_TABLE.lock()))
}

/// First thing a forked child runs (from `ret_from_fork`): release the
/// task-table baton carried over from the parent's schedule pass.
#[no_mangle]
pub extern "C" fn schedule_tail() {
    // SAFETY: the switch into a fresh child is the one resume path with
    // no enclosing `with_task_table` section to drop the guard; the lock
    // is held and owned by this CPU.
    unsafe {
        TASK_TABLE.force_unlock();
    }
}
