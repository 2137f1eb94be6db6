//! Signal delivery and kill escalation.

use std::sync::Arc;
use std::time::Instant;

use crate::error::Error;
use crate::handle::ProcessInner;
use crate::sys;
use crate::trace_categories;

/// Receiver of signals sent on behalf of a handle: the child alone, or its whole process
/// group when it was started in a new one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SignalTarget {
    Process(sys::process::ProcessId),
    Group(sys::process::ProcessId),
}

impl std::fmt::Display for SignalTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process(pid) => write!(f, "process {pid}"),
            Self::Group(pgid) => write!(f, "process group {pgid}"),
        }
    }
}

impl SignalTarget {
    pub(crate) const fn for_child(
        pid: sys::process::ProcessId,
        pgid: sys::process::ProcessId,
        new_process_group: bool,
    ) -> Self {
        if new_process_group {
            Self::Group(pgid)
        } else {
            Self::Process(pid)
        }
    }

    /// Sends the cooperative stop request.
    pub(crate) fn interrupt(self) -> Result<(), Error> {
        self.send(sys::signal::INTERRUPT)
    }

    /// Sends the forced kill.
    pub(crate) fn kill(self) -> Result<(), Error> {
        self.send(sys::signal::KILL)
    }

    pub(crate) fn send(self, signal: i32) -> Result<(), Error> {
        tracing::debug!(target: trace_categories::SIGNALS, "sending signal {signal} to {self}");
        sys::signal::send(self, signal)
    }
}

/// Starts the escalation timer for a process that was just sent the cooperative signal. If
/// the process is still running at `deadline`, it is killed.
///
/// The timer runs on its own thread and holds its own reference to the process, so it fires
/// even if every handle is dropped first.
pub(crate) fn schedule_kill(process: Arc<ProcessInner>, deadline: Instant) -> Result<(), Error> {
    let pid = process.pid();

    std::thread::Builder::new()
        .name(format!("procwarden-kill-{pid}"))
        .spawn(move || {
            if process.wait_while_running_until(deadline) {
                tracing::debug!(
                    target: trace_categories::SIGNALS,
                    pid,
                    "grace period elapsed; escalating to kill"
                );
                if let Err(e) = process.kill_if_running() {
                    tracing::warn!(target: trace_categories::SIGNALS, pid, "kill escalation failed: {e}");
                }
            }
        })?;

    Ok(())
}
