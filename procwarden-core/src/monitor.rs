//! Per-process termination monitor.
//!
//! Each spawned process gets one monitor thread. It blocks until the OS reports the exit,
//! records the exit code (TERMINATED), finalizes the streams, then collects the process
//! (REAPED). Where the platform allows it the process stays a zombie until that last step,
//! so its pid cannot be recycled while signals may still be sent to it.

use std::sync::Arc;

use crate::error::Error;
use crate::handle::{Outcome, ProcessInner, ProcessState};
use crate::sys;
use crate::trace_categories;

/// Starts monitoring a freshly launched process.
pub(crate) fn start(process: Arc<ProcessInner>) -> Result<(), Error> {
    let pid = process.pid();

    std::thread::Builder::new()
        .name(format!("procwarden-monitor-{pid}"))
        .spawn(move || run(&process))?;

    Ok(())
}

fn run(process: &ProcessInner) {
    let pid = process.pid();

    let outcome = match sys::process::await_exit(pid) {
        Ok(code) => {
            tracing::debug!(target: trace_categories::MONITOR, pid, "exited with {code}");
            Outcome::Exited(code)
        }
        Err(e) => {
            tracing::warn!(target: trace_categories::MONITOR, pid, "failed waiting for exit: {e}");
            Outcome::Lost(e.to_string())
        }
    };

    let exited = matches!(outcome, Outcome::Exited(_));
    process.transition(ProcessState::Terminated, Some(outcome));

    process.streams().on_process_exit();

    if exited && let Err(e) = sys::process::reap(pid) {
        tracing::warn!(target: trace_categories::MONITOR, pid, "failed to reap: {e}");
    }

    process.transition(ProcessState::Reaped, None);
}
