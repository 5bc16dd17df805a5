//! Signal posting and handler installation
//!
//! Delivery is a bitmap: posting sets a bit, the scheduler notices it at
//! the next pass (waking interruptible sleepers), and the syscall-return
//! collaborator runs the user handler. The numbers themselves follow the
//! traditional Unix assignment and are fixed by the user-side contract.

use crate::error::{KernelError, Result};
use crate::mm::VirtualAddress;
use crate::sched::{Task, TaskState};

/// Number of signals a task's bitmap and handler table cover.
pub const NSIG: usize = 32;

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGTRAP: u32 = 5;
pub const SIGABRT: u32 = 6;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9;
pub const SIGUSR1: u32 = 10;
pub const SIGSEGV: u32 = 11;
pub const SIGUSR2: u32 = 12;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;

/// Pending-signal bitmap: bit `sig - 1` is signal `sig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SigSet(u32);

impl SigSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn post(&mut self, sig: u32) {
        debug_assert!(sig >= 1 && sig as usize <= NSIG);
        self.0 |= 1 << (sig - 1);
    }

    pub fn take(&mut self, sig: u32) -> bool {
        let bit = 1u32 << (sig - 1);
        let was = self.0 & bit != 0;
        self.0 &= !bit;
        was
    }

    pub const fn contains(&self, sig: u32) -> bool {
        self.0 & (1 << (sig - 1)) != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }
}

/// Post `sig` to a task. An interruptible sleeper becomes Running at the
/// next scheduling pass; delivery here only marks the bitmap.
pub fn send_sig(task: &mut Task, sig: u32) -> Result<()> {
    if sig == 0 || sig as usize > NSIG {
        return Err(KernelError::InvalidArgument { name: "sig" });
    }
    task.signal.post(sig);
    Ok(())
}

/// Signals a user task may install a handler for. SIGKILL stays out.
const fn is_portable(sig: u32) -> bool {
    matches!(
        sig,
        SIGHUP
            | SIGINT
            | SIGQUIT
            | SIGILL
            | SIGTRAP
            | SIGABRT
            | SIGFPE
            | SIGUSR1
            | SIGSEGV
            | SIGUSR2
            | SIGPIPE
            | SIGALRM
            | SIGCHLD
    )
}

/// Install a handler for a portable signal, returning the previous handler
/// address. The restorer is the user-mode trampoline the return path jumps
/// through after the handler.
pub fn install_handler(
    task: &mut Task,
    sig: u32,
    handler: VirtualAddress,
    restorer: VirtualAddress,
) -> Result<i64> {
    if !is_portable(sig) {
        return Err(KernelError::InvalidArgument { name: "sig" });
    }
    let old = task.sig_fn[(sig - 1) as usize];
    task.sig_fn[(sig - 1) as usize] = handler;
    task.sig_restorer = restorer;
    Ok(old.as_u64() as i64)
}

/// Kill: post `sig` to the task with PID `pid`, or to every member of the
/// caller's process group when `pid` is 0.
pub fn kill_with(
    table: &mut crate::process::table::TaskTable,
    pid: i64,
    sig: u32,
) -> Result<i64> {
    if pid > 0 {
        let (_, ptr) = table
            .find_by_pid(pid)
            .ok_or(KernelError::NoSuchProcess)?;
        // SAFETY: table slots hold live task pointers; single-CPU
        // interrupt discipline serializes access.
        send_sig(unsafe { &mut *ptr.as_ptr() }, sig)?;
        return Ok(0);
    }
    if pid == 0 {
        // SAFETY: as above.
        let pgrp = unsafe { table.current_task().pgrp };
        let mut hit = false;
        for i in 1..crate::sched::NR_TASKS {
            if let Some(ptr) = table.slot(i) {
                // SAFETY: as above.
                let task = unsafe { &mut *ptr.as_ptr() };
                if task.pgrp == pgrp {
                    send_sig(task, sig)?;
                    hit = true;
                }
            }
        }
        return if hit { Ok(0) } else { Err(KernelError::NoSuchProcess) };
    }
    Err(KernelError::InvalidArgument { name: "pid" })
}

/// Scheduler hook: wake any interruptible sleeper with something pending.
pub fn wake_if_signalled(task: &mut Task) {
    if !task.signal.is_empty() && task.state == TaskState::InterruptibleSleep {
        task.state = TaskState::Running;
    }
}
