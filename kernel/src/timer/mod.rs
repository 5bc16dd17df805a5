//! Tick accounting and wall time
//!
//! `jiffies` counts timer interrupts since boot; `startup_time` is the
//! Unix epoch at boot, seeded from the CMOS clock. Wall time is
//! `startup_time + jiffies / HZ`.

use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::arch::x86_64::rtc::{read_rtc, Tm};
use crate::sched::HZ;

/// Timer interrupts since boot.
static JIFFIES: AtomicU64 = AtomicU64::new(0);

/// Unix epoch seconds at boot.
static STARTUP_TIME: AtomicI64 = AtomicI64::new(0);

/// Current tick count.
pub fn jiffies() -> u64 {
    JIFFIES.load(Ordering::Relaxed)
}

/// Boot wall-clock time in Unix epoch seconds.
pub fn startup_time() -> i64 {
    STARTUP_TIME.load(Ordering::Relaxed)
}

/// Overwrite the boot epoch (sys_stime adjusts wall time this way).
pub fn set_startup_time(secs: i64) {
    STARTUP_TIME.store(secs, Ordering::Relaxed);
}

/// Wall-clock seconds since the Unix epoch.
pub fn current_time() -> i64 {
    startup_time() + (jiffies() / HZ) as i64
}

/// Seed the wall clock from the CMOS RTC. Called once at boot, before
/// interrupts are enabled.
pub fn time_init() {
    let tm = read_rtc();
    let epoch = kernel_mktime(&tm);
    STARTUP_TIME.store(epoch, Ordering::Relaxed);
    log::info!("time: boot epoch {}", epoch);
}

/// One timer interrupt: bump `jiffies` and run tick accounting.
/// `from_user_mode` tells the scheduler whether preemption is allowed.
pub fn tick(from_user_mode: bool) {
    JIFFIES.fetch_add(1, Ordering::Relaxed);
    crate::sched::do_timer(from_user_mode);
}

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const YEAR: i64 = 365 * DAY;

/// Cumulative seconds at the start of each month, leap February assumed;
/// the off-by-one for non-leap years is subtracted below.
const MONTH: [i64; 12] = [
    0,
    DAY * 31,
    DAY * (31 + 29),
    DAY * (31 + 29 + 31),
    DAY * (31 + 29 + 31 + 30),
    DAY * (31 + 29 + 31 + 30 + 31),
    DAY * (31 + 29 + 31 + 30 + 31 + 30),
    DAY * (31 + 29 + 31 + 30 + 31 + 30 + 31),
    DAY * (31 + 29 + 31 + 30 + 31 + 30 + 31 + 31),
    DAY * (31 + 29 + 31 + 30 + 31 + 30 + 31 + 31 + 30),
    DAY * (31 + 29 + 31 + 30 + 31 + 30 + 31 + 31 + 30 + 31),
    DAY * (31 + 29 + 31 + 30 + 31 + 30 + 31 + 31 + 30 + 31 + 30),
];

/// Convert a broken-down RTC time to Unix epoch seconds.
///
/// Valid through 2099: every fourth year from 1972 is a leap year, which
/// holds for the whole two-digit CMOS era.
pub fn kernel_mktime(tm: &Tm) -> i64 {
    let year = tm.year as i64 - 70;
    // Leap days for completed years; 1972 was the first in the epoch.
    let mut res = YEAR * year + DAY * ((year + 1) / 4);
    res += MONTH[tm.mon as usize];
    // MONTH assumes a leap February; take the day back in non-leap years.
    if tm.mon > 1 && (year + 2) % 4 != 0 {
        res -= DAY;
    }
    res += DAY * (tm.mday as i64 - 1);
    res += HOUR * tm.hour as i64;
    res += MINUTE * tm.min as i64;
    res += tm.sec as i64;
    res
}

/// Timer interrupt body: acknowledge the PIC, then account the tick.
/// The entry stub passes the saved frame; CPL of the interrupted context
/// comes from its CS selector.
#[no_mangle]
pub extern "C" fn do_timer_interrupt(frame: *mut crate::syscall::SyscallFrame) {
    crate::arch::x86_64::timer::end_of_interrupt();
    // SAFETY: the entry stub hands us the live frame it just built.
    let from_user_mode = unsafe { (*frame).cs & 3 == 3 };
    tick(from_user_mode);
}
