//! Process management utilities

use crate::error::{Error, PlatformLimitation};
use crate::strategy::LaunchMethod;
use crate::sys::launch::{ChildStdio, LaunchRequest};

pub(crate) type ProcessId = i32;

pub(crate) fn supports(_method: LaunchMethod) -> bool {
    false
}

pub(crate) fn launch(
    method: LaunchMethod,
    _request: &LaunchRequest,
    _stdio: ChildStdio,
) -> Result<ProcessId, Error> {
    Err(PlatformLimitation::StrategyUnavailable(method.as_strategy()).into())
}

pub(crate) fn current_group() -> ProcessId {
    0
}

pub(crate) const EXIT_LEAVES_ZOMBIE: bool = false;

pub(crate) fn await_exit(pid: ProcessId) -> Result<i32, Error> {
    Err(Error::MonitorFailed {
        pid,
        reason: "process tracking is unavailable on this platform".into(),
    })
}

pub(crate) fn reap(_pid: ProcessId) -> Result<(), Error> {
    Ok(())
}

pub(crate) fn collect(_pid: ProcessId) -> Result<(), Error> {
    Ok(())
}
