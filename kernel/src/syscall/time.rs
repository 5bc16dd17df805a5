//! Wall-clock syscalls

use crate::error::{errno_return, KernelError};
use crate::mm::frame_allocator::FRAME_MAP;
use crate::mm::paging::AddressSpace;
use crate::mm::user_validation::verify_area;
use crate::mm::VirtualAddress;
use crate::process::table::with_task_table;
use crate::sched::HZ;
use crate::syscall::SyscallFrame;
use crate::timer;

/// time(2): seconds since the epoch; stored through `rbx` when non-null.
pub fn sys_time(frame: &mut SyscallFrame) -> i64 {
    let t = timer::current_time();
    let tloc = frame.rbx;
    if tloc != 0 {
        let res = with_task_table(|table| {
            // SAFETY: current task is live under the table lock.
            let base = unsafe { table.current_task() }.data_base();
            let space = AddressSpace::kernel();
            let mut mem = FRAME_MAP.lock();
            verify_area(&space, &mut mem, VirtualAddress::new(base), tloc, 8)?;
            // SAFETY: page made privately writable; identity mapping
            // makes this a plain store.
            unsafe {
                ((base + tloc) as *mut i64).write_unaligned(t);
            }
            Ok(t)
        });
        return errno_return(res);
    }
    t
}

/// stime(2): superuser rewinds the boot epoch so that wall time becomes
/// the value read from `rbx`'s pointee.
pub fn sys_stime(frame: &mut SyscallFrame) -> i64 {
    let tptr = frame.rbx;
    errno_return(with_task_table(|table| {
        // SAFETY: current task is live under the table lock.
        let task = unsafe { table.current_task() };
        if task.euid != 0 {
            return Err(KernelError::PermissionDenied);
        }
        if tptr == 0 {
            return Err(KernelError::InvalidArgument { name: "tptr" });
        }
        let base = task.data_base();
        // SAFETY: user pointer in the task's segment; identity mapping.
        let secs = unsafe { ((base + tptr) as *const i64).read_unaligned() };
        timer::set_startup_time(secs - (timer::jiffies() / HZ) as i64);
        Ok(0)
    }))
}
