//! COM1 serial console sink
//!
//! All kernel console output ultimately lands here on bare metal. The UART
//! is the only output device the core depends on; the VGA/TTY stack is an
//! external collaborator.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod uart {
    use lazy_static::lazy_static;
    use spin::Mutex;
    use uart_16550::SerialPort;

    lazy_static! {
        pub static ref SERIAL1: Mutex<SerialPort> = {
            // SAFETY: 0x3F8 is the standard COM1 base; probing it is harmless
            // on every PC-compatible this kernel targets.
            let mut serial_port = unsafe { SerialPort::new(0x3F8) };
            serial_port.init();
            Mutex::new(serial_port)
        };
    }
}

/// Write preformatted arguments to the serial port.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn _print(args: core::fmt::Arguments) {
    use core::fmt::Write;

    crate::arch::without_interrupts(|| {
        uart::SERIAL1
            .lock()
            .write_fmt(args)
            .ok();
    });
}

// Host build: mirror serial output onto stdout so tests can observe it.
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
pub fn _print(args: core::fmt::Arguments) {
    #[cfg(any(test, not(target_os = "none")))]
    {
        use std::io::Write;
        std::io::stdout().write_fmt(args).ok();
    }
    #[cfg(all(target_os = "none", not(test)))]
    let _ = args;
}
