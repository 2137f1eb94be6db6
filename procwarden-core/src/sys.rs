//! Platform abstraction facilities

#[cfg(unix)]
pub(crate) mod unix;
#[cfg(unix)]
pub(crate) use unix as platform;

#[cfg(not(unix))]
pub(crate) mod stubs;
#[cfg(not(unix))]
pub(crate) use stubs as platform;

pub(crate) mod launch;

pub(crate) use platform::fd;
pub(crate) use platform::process;
pub(crate) use platform::signal;
