//! Process management utilities

use crate::error::Error;
use crate::results;
use crate::strategy::LaunchMethod;
use crate::sys::launch::{ChildStdio, LaunchRequest};
use crate::sys::unix::spawn::{self, Duplicate, ExecImage};

pub(crate) type ProcessId = i32;

/// Whether the launch method exists on this platform.
pub(crate) const fn supports(method: LaunchMethod) -> bool {
    match method {
        LaunchMethod::ForkExec => true,
        LaunchMethod::VforkExec => cfg!(target_os = "linux"),
        LaunchMethod::PosixSpawn => cfg!(any(
            target_os = "freebsd",
            target_os = "haiku",
            target_os = "linux",
            target_os = "netbsd",
            target_vendor = "apple"
        )),
    }
}

/// Starts the child described by `request` with the given method. The child-side stdio
/// descriptors are closed in the parent before this returns.
pub(crate) fn launch(
    method: LaunchMethod,
    request: &LaunchRequest,
    stdio: ChildStdio,
) -> Result<ProcessId, Error> {
    let image = ExecImage::new(request)?;

    match method {
        LaunchMethod::ForkExec => spawn::fork_exec(Duplicate::Fork, request, &image, stdio),
        #[cfg(target_os = "linux")]
        LaunchMethod::VforkExec => spawn::fork_exec(Duplicate::Vfork, request, &image, stdio),
        #[cfg(not(target_os = "linux"))]
        LaunchMethod::VforkExec => Err(crate::error::SpawnError::UnsupportedStrategy {
            strategy: method.as_strategy(),
            reason: "not available on this platform",
        }
        .into()),
        #[cfg(any(
            target_os = "freebsd",
            target_os = "haiku",
            target_os = "linux",
            target_os = "netbsd",
            target_vendor = "apple"
        ))]
        LaunchMethod::PosixSpawn => spawn::posix_spawn(request, &image, stdio),
        #[cfg(not(any(
            target_os = "freebsd",
            target_os = "haiku",
            target_os = "linux",
            target_os = "netbsd",
            target_vendor = "apple"
        )))]
        LaunchMethod::PosixSpawn => Err(crate::error::SpawnError::UnsupportedStrategy {
            strategy: method.as_strategy(),
            reason: "not available on this platform",
        }
        .into()),
    }
}

/// Process group of the calling process.
pub(crate) fn current_group() -> ProcessId {
    nix::unistd::getpgrp().as_raw()
}

/// Whether [`await_exit`] leaves the child unreaped, so [`reap`] must collect it.
pub(crate) const EXIT_LEAVES_ZOMBIE: bool = cfg!(any(target_os = "linux", target_os = "android"));

/// Blocks until the child exits and returns its exit code. Where supported, the child is
/// left as a zombie so its pid cannot be recycled until [`reap`] is called.
pub(crate) fn await_exit(pid: ProcessId) -> Result<i32, Error> {
    let pid = nix::unistd::Pid::from_raw(pid);

    loop {
        match wait_without_reaping(pid) {
            Ok(nix::sys::wait::WaitStatus::Exited(_pid, code)) => return Ok(code),
            Ok(nix::sys::wait::WaitStatus::Signaled(_pid, signal, _core_dumped)) => {
                return Ok(results::from_signal(signal as i32));
            }
            Ok(_) | Err(nix::errno::Errno::EINTR) => (),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Collects a child already known to have exited.
pub(crate) fn reap(pid: ProcessId) -> Result<(), Error> {
    if EXIT_LEAVES_ZOMBIE {
        collect(pid)
    } else {
        Ok(())
    }
}

/// Waits for the child to exit and collects it, whatever the platform's `await_exit` does.
pub(crate) fn collect(pid: ProcessId) -> Result<(), Error> {
    loop {
        match nix::sys::wait::waitpid(nix::unistd::Pid::from_raw(pid), None) {
            Err(nix::errno::Errno::EINTR) => (),
            Ok(_) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn wait_without_reaping(
    pid: nix::unistd::Pid,
) -> Result<nix::sys::wait::WaitStatus, nix::errno::Errno> {
    nix::sys::wait::waitid(
        nix::sys::wait::Id::Pid(pid),
        nix::sys::wait::WaitPidFlag::WEXITED | nix::sys::wait::WaitPidFlag::WNOWAIT,
    )
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn wait_without_reaping(
    pid: nix::unistd::Pid,
) -> Result<nix::sys::wait::WaitStatus, nix::errno::Errno> {
    nix::sys::wait::waitpid(pid, None)
}
