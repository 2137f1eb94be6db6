//! Exit-code conventions.
//!
//! Exit codes are reported the way POSIX shells report them, so callers can branch on the
//! same numbers they would see from `$?`: a normal exit reports its status (0-255), a child
//! killed by a signal reports `128 + signal`, and a command that could not be found reports
//! 127.

/// Exit code of a successful process.
pub const SUCCESS: i32 = 0;

/// Exit code reported when a command could not be executed (found, but not runnable).
pub const CANNOT_EXECUTE: i32 = 126;

/// Exit code reported when a command could not be found.
pub const COMMAND_NOT_FOUND: i32 = 127;

/// Offset added to a signal number for signal-terminated processes.
pub const SIGNAL_EXIT_OFFSET: i32 = 128;

/// Exit code of a process stopped by `SIGTERM`.
pub const TERMINATED: i32 = SIGNAL_EXIT_OFFSET + 15;

/// Exit code of a process stopped by `SIGKILL`.
pub const KILLED: i32 = SIGNAL_EXIT_OFFSET + 9;

/// Exit code of a crashed process as typically observed on macOS. Native programs there
/// abort through a trap instruction on fatal faults, which is delivered as `SIGILL` (4), so
/// supervisors see 132 rather than 139.
#[cfg(target_os = "macos")]
pub const CRASHED: i32 = SIGNAL_EXIT_OFFSET + 4;
/// Exit code of a process that crashed on an invalid memory access (`SIGSEGV`).
#[cfg(not(target_os = "macos"))]
pub const CRASHED: i32 = SIGNAL_EXIT_OFFSET + 11;

/// Returns the exit code reported for a process terminated by the given signal.
pub const fn from_signal(signal: i32) -> i32 {
    SIGNAL_EXIT_OFFSET + (signal & 0x7F)
}

/// Classification of an exit code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitKind {
    /// The process exited on its own with the given status.
    Exited(i32),
    /// The process was terminated by the given signal.
    Signaled(i32),
    /// The command was not found.
    NotFound,
}

/// Classifies an exit code produced by this crate.
///
/// Codes above 128 are assumed to be signal terminations, which is ambiguous for programs
/// that exit with such statuses on their own.
pub const fn classify(code: i32) -> ExitKind {
    match code {
        COMMAND_NOT_FOUND => ExitKind::NotFound,
        c if c > SIGNAL_EXIT_OFFSET && c < SIGNAL_EXIT_OFFSET + 65 => {
            ExitKind::Signaled(c - SIGNAL_EXIT_OFFSET)
        }
        c => ExitKind::Exited(c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_codes() {
        assert_eq!(TERMINATED, 143);
        assert_eq!(KILLED, 137);
        assert_eq!(from_signal(15), 143);
        assert_eq!(from_signal(9), KILLED);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(0), ExitKind::Exited(0));
        assert_eq!(classify(3), ExitKind::Exited(3));
        assert_eq!(classify(127), ExitKind::NotFound);
        assert_eq!(classify(137), ExitKind::Signaled(9));
        assert_eq!(classify(CRASHED), ExitKind::Signaled(CRASHED - 128));
        assert_eq!(classify(128), ExitKind::Exited(128));
    }
}
