//! Kernel error types
//!
//! Recoverable failures surface as [`KernelError`] values and cross the
//! syscall boundary as negative errno returns. Conditions that would leave
//! an internal invariant broken do not get an error variant; they panic.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// No free physical frame (or page-table frame) was available
    OutOfMemory,
    /// A slot or PID could not be allocated right now
    TryAgain,
    /// An interruptible wait was broken by a signal
    Interrupted,
    /// The caller has no child matching the wait request
    NoChild,
    /// No task with the requested PID exists
    NoSuchProcess,
    /// A syscall argument was rejected
    InvalidArgument { name: &'static str },
    /// The caller lacks the privilege for the operation
    PermissionDenied,
    /// The syscall slot is a placeholder
    NotImplemented,
}

/// Errno values in the range the syscall return convention encodes.
pub const EPERM: i64 = 1;
pub const ENOMEM: i64 = 12;
pub const EAGAIN: i64 = 11;
pub const EINTR: i64 = 4;
pub const ECHILD: i64 = 10;
pub const ESRCH: i64 = 3;
pub const EINVAL: i64 = 22;
pub const ENOSYS: i64 = 38;

impl KernelError {
    /// Map to the negative errno convention used at the syscall boundary.
    pub const fn errno(self) -> i64 {
        match self {
            KernelError::OutOfMemory => -ENOMEM,
            KernelError::TryAgain => -EAGAIN,
            KernelError::Interrupted => -EINTR,
            KernelError::NoChild => -ECHILD,
            KernelError::NoSuchProcess => -ESRCH,
            KernelError::InvalidArgument { .. } => -EINVAL,
            KernelError::PermissionDenied => -EPERM,
            KernelError::NotImplemented => -ENOSYS,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::TryAgain => write!(f, "resource temporarily unavailable"),
            KernelError::Interrupted => write!(f, "interrupted by signal"),
            KernelError::NoChild => write!(f, "no child processes"),
            KernelError::NoSuchProcess => write!(f, "no such process"),
            KernelError::InvalidArgument { name } => write!(f, "invalid argument: {}", name),
            KernelError::PermissionDenied => write!(f, "operation not permitted"),
            KernelError::NotImplemented => write!(f, "function not implemented"),
        }
    }
}

/// Convenience alias for kernel results
pub type Result<T> = core::result::Result<T, KernelError>;

/// Fold a kernel result into the syscall return convention: `Ok(v)` maps to
/// `v`, `Err(e)` to the negative errno.
pub fn errno_return(res: Result<i64>) -> i64 {
    match res {
        Ok(v) => v,
        Err(e) => e.errno(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_convention() {
        assert_eq!(KernelError::OutOfMemory.errno(), -12);
        assert_eq!(KernelError::TryAgain.errno(), -11);
        assert_eq!(KernelError::Interrupted.errno(), -4);
        assert_eq!(KernelError::NotImplemented.errno(), -38);
    }

    #[test]
    fn errno_return_passes_values_through() {
        assert_eq!(errno_return(Ok(42)), 42);
        assert_eq!(errno_return(Err(KernelError::NoChild)), -10);
    }
}
