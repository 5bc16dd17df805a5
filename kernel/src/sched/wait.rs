//! Wait queues
//!
//! A queue is one pointer: the most recently added sleeper. Earlier
//! sleepers are daisy-chained through each sleeper's stack frame (the
//! `tmp` local below): when a sleeper resumes, it wakes whoever it
//! displaced. `wake_up` therefore wakes exactly one task, and the chain
//! unwinds newest-first.

use super::scheduler::schedule_with;
use super::task::{TaskPtr, TaskState};
use crate::process::table::TaskTable;

/// Single-pointer LIFO wait queue.
#[derive(Debug, Default)]
pub struct WaitQueue {
    head: Option<TaskPtr>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self { head: None }
    }

    pub fn head(&self) -> Option<TaskPtr> {
        self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// Sleep uninterruptibly on `q` until a `wake_up` (or a later sleeper's
/// unwind) makes us Running again. Task 0 must never sleep.
pub fn sleep_on(table: &mut TaskTable, q: &mut WaitQueue) {
    if table.current_index() == 0 {
        panic!("task[0] trying to sleep");
    }
    let tmp = q.head.take();
    let current = table.current();
    q.head = Some(current);
    // SAFETY: current task is live; interrupt discipline held by caller.
    unsafe { current.get_mut() }.state = TaskState::UninterruptibleSleep;
    schedule_with(table, crate::timer::jiffies());
    // Woken: pass the wake down the chain.
    if let Some(prev) = tmp {
        // SAFETY: a chained sleeper stays live while it sleeps.
        unsafe { prev.get_mut() }.state = TaskState::Running;
    }
}

/// Sleep interruptibly on `q`. Only the queue head may leave; a sleeper
/// woken while displaced re-wakes the newer head and goes back to sleep.
/// Signals break the sleep through the scheduler's signal pass.
pub fn interruptible_sleep_on(table: &mut TaskTable, q: &mut WaitQueue) {
    if table.current_index() == 0 {
        panic!("task[0] trying to sleep");
    }
    let tmp = q.head.take();
    let current = table.current();
    q.head = Some(current);
    loop {
        // SAFETY: current task is live; interrupt discipline held.
        unsafe { current.get_mut() }.state = TaskState::InterruptibleSleep;
        schedule_with(table, crate::timer::jiffies());
        match q.head {
            Some(head) if head != current => {
                // A newer sleeper displaced us; it leaves first.
                // SAFETY: the head is a live sleeping task.
                unsafe { head.get_mut() }.state = TaskState::Running;
                continue;
            }
            _ => break,
        }
    }
    q.head = None;
    if let Some(prev) = tmp {
        // SAFETY: a chained sleeper stays live while it sleeps.
        unsafe { prev.get_mut() }.state = TaskState::Running;
    }
}

/// Wake the queue head (exactly one task) and clear the queue. Earlier
/// sleepers surface through the daisy chain as the head unwinds.
pub fn wake_up(q: &mut WaitQueue) {
    if let Some(head) = q.head.take() {
        // SAFETY: queued tasks are live sleepers.
        unsafe { head.get_mut() }.state = TaskState::Running;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::testing::leak_task;
    use crate::sched::Task;

    fn table_with_tasks(n: usize) -> (TaskTable, std::vec::Vec<TaskPtr>) {
        let mut table = TaskTable::new();
        table.install_idle(leak_task(Task::idle()));
        let mut ptrs = std::vec::Vec::new();
        for i in 1..=n {
            let mut t = Task::idle();
            t.pid = i as i64;
            let ptr = leak_task(t);
            table.set_slot(i, ptr);
            ptrs.push(ptr);
        }
        (table, ptrs)
    }

    #[test]
    fn wake_up_wakes_only_the_head() {
        let (_table, tasks) = table_with_tasks(3);
        let mut q = WaitQueue::new();

        // Three sleepers queued in order; the queue remembers only the
        // newest, each newer one remembers its predecessor.
        for &t in &tasks {
            unsafe { t.get_mut() }.state = TaskState::UninterruptibleSleep;
        }
        q.head = Some(tasks[2]);

        wake_up(&mut q);
        assert!(q.is_empty());
        assert_eq!(unsafe { tasks[2].get() }.state, TaskState::Running);
        assert_eq!(
            unsafe { tasks[1].get() }.state,
            TaskState::UninterruptibleSleep
        );
        assert_eq!(
            unsafe { tasks[0].get() }.state,
            TaskState::UninterruptibleSleep
        );
    }

    #[test]
    fn sleep_on_links_lifo_and_unwinds_the_chain() {
        let (mut table, tasks) = table_with_tasks(2);
        let mut q = WaitQueue::new();

        // First sleeper becomes the head.
        table.set_current(1);
        sleep_on(&mut table, &mut q);
        // The host switch primitive returns immediately, so the sleeper
        // "resumed" already: it saw no predecessor to wake.
        assert_eq!(q.head(), Some(tasks[0]));

        // Second sleeper displaces the first and, on resume, wakes it.
        unsafe { tasks[0].get_mut() }.state = TaskState::UninterruptibleSleep;
        table.set_current(2);
        sleep_on(&mut table, &mut q);
        assert_eq!(q.head(), Some(tasks[1]));
        assert_eq!(unsafe { tasks[0].get() }.state, TaskState::Running);
    }

    #[test]
    #[should_panic(expected = "task[0] trying to sleep")]
    fn idle_task_must_not_sleep() {
        let (mut table, _tasks) = table_with_tasks(1);
        let mut q = WaitQueue::new();
        table.set_current(0);
        sleep_on(&mut table, &mut q);
    }

    #[test]
    fn interruptible_sleeper_clears_queue_on_exit() {
        let (mut table, tasks) = table_with_tasks(1);
        let mut q = WaitQueue::new();

        table.set_current(1);
        interruptible_sleep_on(&mut table, &mut q);
        // Undisplaced head leaves and empties the queue.
        assert!(q.is_empty());
        let _ = tasks;
    }
}
