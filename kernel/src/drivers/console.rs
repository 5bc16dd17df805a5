//! Console output contract
//!
//! The core's view of the TTY layer is the `tty_write(minor, buf, n)`
//! contract: called once per `print!` from the kernel, and by the syscall
//! layer on behalf of user tasks. Line discipline, echo and input live in
//! the external TTY collaborator; minor 0 is routed to the serial sink.

use core::fmt;

/// Console minor the kernel itself prints to.
pub const CONSOLE_MINOR: u32 = 0;

/// Initialize the console device. Called once at boot, before the first
/// `print!`.
pub fn console_init() {
    // The serial sink initializes lazily on first write; nothing to do
    // beyond making the call ordering explicit for the boot collaborator.
}

/// Write `buf` to the console designated by `minor`. Returns the number of
/// bytes consumed.
///
/// Only the kernel console is backed here; other minors belong to the TTY
/// collaborator and are reported as consuming nothing.
pub fn tty_write(minor: u32, buf: &[u8]) -> usize {
    if minor != CONSOLE_MINOR {
        return 0;
    }
    match core::str::from_utf8(buf) {
        Ok(s) => crate::serial::_print(format_args!("{}", s)),
        Err(_) => {
            for &b in buf {
                let c = if b.is_ascii() { b as char } else { '?' };
                crate::serial::_print(format_args!("{}", c));
            }
        }
    }
    buf.len()
}

/// Sink for the `print!`/`println!` macros.
pub fn _print(args: fmt::Arguments) {
    crate::serial::_print(args);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tty_write_consumes_console_bytes() {
        assert_eq!(tty_write(CONSOLE_MINOR, b"hello\n"), 6);
    }

    #[test]
    fn tty_write_ignores_foreign_minors() {
        assert_eq!(tty_write(3, b"hello\n"), 0);
    }
}
