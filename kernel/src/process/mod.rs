//! Process management
//!
//! The task table, fork, exit/reaping and signal delivery. A task's
//! address space is the 64 MiB window of the shared page tree at
//! `slot * TASK_WINDOW`; fork derives the child's window from its slot
//! instead of running a general allocator.

pub mod exit;
pub mod fork;
pub mod signal_delivery;
pub mod table;

/// Size and alignment of a task's virtual-address window (64 MiB).
pub const TASK_WINDOW: u64 = 0x0400_0000;

pub use fork::copy_process;
pub use table::{with_task_table, TaskTable, TASK_TABLE};
