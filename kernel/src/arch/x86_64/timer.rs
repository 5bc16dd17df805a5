//! Programmable interval timer (PIT) setup
//!
//! Channel 0 in rate-generator mode drives the scheduler tick at `HZ`.

use crate::sched::HZ;

/// PIT input clock in Hz.
pub const PIT_CLOCK: u32 = 1_193_180;

/// Divisor latched into channel 0 for an HZ-rate tick.
pub const LATCH: u16 = (PIT_CLOCK / HZ as u32) as u16;

#[cfg(target_os = "none")]
mod hw {
    use pic8259::ChainedPics;
    use spin::Mutex;
    use x86_64::instructions::port::Port;

    use super::LATCH;
    use crate::arch::x86_64::idt::TIMER_VECTOR;

    /// Primary/secondary PIC remapped to vectors 0x20..0x2F.
    // SAFETY: the offsets steer clear of the CPU exception vectors.
    pub static PICS: Mutex<ChainedPics> = Mutex::new(unsafe { ChainedPics::new(0x20, 0x28) });

    /// Program channel 0 and unmask IRQ0. Boot-time, interrupts disabled.
    pub fn init_pit() {
        let mut cmd: Port<u8> = Port::new(0x43);
        let mut data: Port<u8> = Port::new(0x40);
        // SAFETY: standard PIT programming sequence on ports 0x43/0x40.
        unsafe {
            cmd.write(0x36u8); // channel 0, lobyte/hibyte, rate generator
            data.write((LATCH & 0xFF) as u8);
            data.write((LATCH >> 8) as u8);
        }

        let mut pics = PICS.lock();
        // SAFETY: remap then mask everything except the timer line.
        unsafe {
            pics.initialize();
            pics.write_masks(!0x01, !0x00);
        }
    }

    /// Acknowledge the tick so the PIC delivers the next one.
    pub fn end_of_interrupt() {
        // SAFETY: only called from the timer interrupt path.
        unsafe {
            PICS.lock().notify_end_of_interrupt(TIMER_VECTOR);
        }
    }
}

#[cfg(target_os = "none")]
pub use hw::{end_of_interrupt, init_pit};

#[cfg(not(target_os = "none"))]
pub fn init_pit() {}

#[cfg(not(target_os = "none"))]
pub fn end_of_interrupt() {}
