//! Scheduling
//!
//! Task descriptors, the wait-queue primitives and the scheduler itself.
//! Global entry points here lock the task table under the interrupt
//! discipline and delegate to the table-parameterized functions, which is
//! also what the tests drive directly on isolated tables.

pub mod scheduler;
pub mod task;
pub mod wait;

pub use scheduler::{do_timer_with, math_state_restore, schedule_with, switch_to};
pub use task::{Task, TaskPtr, TaskState};
pub use wait::{sleep_on as sleep_on_with, wake_up, WaitQueue};

use crate::process::table::with_task_table;

/// Size of the task table; slot 0 is the idle task.
pub const NR_TASKS: usize = 64;

/// Timer interrupts per second.
pub const HZ: u64 = 100;

/// One scheduling pass on the global table.
pub fn schedule() {
    with_task_table(|table| schedule_with(table, crate::timer::jiffies()));
}

/// Timer tick accounting on the global table.
pub fn do_timer(from_user_mode: bool) {
    with_task_table(|table| do_timer_with(table, from_user_mode, crate::timer::jiffies()));
}

/// Uninterruptible sleep on `q` for the current task.
pub fn sleep_on(q: &mut WaitQueue) {
    with_task_table(|table| wait::sleep_on(table, q));
}

/// Interruptible sleep on `q` for the current task.
pub fn interruptible_sleep_on(q: &mut WaitQueue) {
    with_task_table(|table| wait::interruptible_sleep_on(table, q));
}

/// The idle task's frame: descriptor at the bottom, kernel stack on top,
/// statically allocated for the life of the system.
#[repr(C, align(4096))]
struct IdlePage(core::cell::UnsafeCell<[u8; crate::mm::PAGE_SIZE]>);

// SAFETY: accessed once during single-threaded boot, then only through
// the task table under the interrupt discipline.
unsafe impl Sync for IdlePage {}

static IDLE_PAGE: IdlePage = IdlePage(core::cell::UnsafeCell::new([0; crate::mm::PAGE_SIZE]));

/// Bring up the scheduler: install the idle task, descriptor tables, the
/// PIT and the two interrupt gates the core owns. Interrupts must still
/// be disabled.
pub fn sched_init() {
    let idle_ptr = IDLE_PAGE.0.get() as *mut Task;
    // SAFETY: the idle page is reserved for exactly this descriptor and
    // nothing has touched it yet.
    unsafe {
        idle_ptr.write(Task::idle());
    }
    let idle = match TaskPtr::from_raw(idle_ptr) {
        Some(p) => p,
        None => unreachable!(),
    };

    with_task_table(|table| table.install_idle(idle));

    {
        let mut gdt = crate::arch::x86_64::gdt::GDT.lock();
        // SAFETY: idle descriptor just initialized above.
        let ldt_base = unsafe { (*idle_ptr).ldt.as_ptr() as u64 };
        gdt.set_ldt_desc(0, ldt_base);
    }
    crate::arch::x86_64::gdt::load();
    crate::arch::x86_64::gdt::set_kernel_stack(Task::stack_top(idle_ptr));

    crate::arch::x86_64::timer::init_pit();
    crate::arch::x86_64::idt::set_intr_gate(
        crate::arch::x86_64::idt::TIMER_VECTOR,
        crate::arch::x86_64::entry::timer_interrupt_addr(),
    );
    crate::arch::x86_64::idt::set_system_gate(
        crate::arch::x86_64::idt::SYSCALL_VECTOR,
        crate::arch::x86_64::entry::system_call_addr(),
    );

    log::info!("sched: idle task installed, timer at {} Hz", HZ);
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::{Task, TaskPtr};

    /// Park a task descriptor on the host heap and hand back the raw
    /// pointer wrapper the table code works with. Leaked deliberately:
    /// descriptors never move or die inside a test's table.
    pub fn leak_task(task: Task) -> TaskPtr {
        match TaskPtr::from_raw(std::boxed::Box::into_raw(std::boxed::Box::new(task))) {
            Some(p) => p,
            None => unreachable!(),
        }
    }
}
