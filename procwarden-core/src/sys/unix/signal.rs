use crate::error::{self, PlatformLimitation};
use crate::signals::SignalTarget;
use crate::sys;

/// Signal requesting orderly termination.
pub(crate) const INTERRUPT: i32 = nix::libc::SIGTERM;

/// Signal forcing termination.
pub(crate) const KILL: i32 = nix::libc::SIGKILL;

/// Delivers `signal` to the target. A target that no longer exists is not an error: it has
/// already exited.
pub(crate) fn send(target: SignalTarget, signal: i32) -> Result<(), error::Error> {
    let translated = nix::sys::signal::Signal::try_from(signal).map_err(|_errno| {
        error::Error::FailedToSendSignal {
            signal,
            target: target.to_string(),
        }
    })?;

    let result = match target {
        SignalTarget::Process(pid) => {
            nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), translated)
        }
        SignalTarget::Group(pgid) => {
            nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pgid), translated)
        }
    };

    match result {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(_errno) => Err(error::Error::FailedToSendSignal {
            signal,
            target: target.to_string(),
        }),
    }
}

/// Returns whether any process is still a member of the group.
pub(crate) fn group_exists(pgid: sys::process::ProcessId) -> bool {
    // A null signal performs the permission and existence checks only. EPERM means members
    // exist that we may not signal.
    !matches!(
        nix::sys::signal::killpg(nix::unistd::Pid::from_raw(pgid), None),
        Err(nix::errno::Errno::ESRCH)
    )
}

pub(crate) fn check_group_signals() -> Result<(), PlatformLimitation> {
    Ok(())
}
