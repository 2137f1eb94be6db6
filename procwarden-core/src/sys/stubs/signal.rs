use crate::error::{self, PlatformLimitation};
use crate::signals::SignalTarget;
use crate::sys;

pub(crate) const INTERRUPT: i32 = 15;
pub(crate) const KILL: i32 = 9;

pub(crate) fn send(target: SignalTarget, signal: i32) -> Result<(), error::Error> {
    Err(error::Error::FailedToSendSignal {
        signal,
        target: target.to_string(),
    })
}

pub(crate) fn group_exists(_pgid: sys::process::ProcessId) -> bool {
    false
}

pub(crate) fn check_group_signals() -> Result<(), PlatformLimitation> {
    Err(PlatformLimitation::GroupSignalUnsupportedForDetachedChild)
}
