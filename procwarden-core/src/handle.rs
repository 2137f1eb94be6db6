//! Handles to spawned processes.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::config::SpawnConfig;
use crate::error::{Error, StateError};
use crate::locks::{lock, wait_timeout_while, wait_while};
use crate::pipes::{PipeReader, PipeWriter, Streams};
use crate::signals::{self, SignalTarget};
use crate::strategy::SpawnStrategy;
use crate::sys;
use crate::trace_categories;

/// Lifecycle of a spawned process. States only move forward.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    /// The launch call is in progress.
    Spawning,
    /// The process is running.
    Running,
    /// The process has exited and its exit code is known; streams are being finalized.
    Terminated,
    /// The process has been collected and its streams finalized. Terminal.
    Reaped,
}

/// How the process ended, as seen by the monitor.
#[derive(Clone, Debug)]
pub(crate) enum Outcome {
    Exited(i32),
    Lost(String),
}

#[derive(Debug)]
struct Lifecycle {
    state: ProcessState,
    outcome: Option<Outcome>,
    interrupt_sent_at: Option<Instant>,
}

/// State shared by every clone of a handle, the monitor, and the kill timer.
#[derive(Debug)]
pub(crate) struct ProcessInner {
    pid: sys::process::ProcessId,
    pgid: sys::process::ProcessId,
    strategy: SpawnStrategy,
    config: SpawnConfig,
    target: SignalTarget,
    lifecycle: Mutex<Lifecycle>,
    changed: Condvar,
    state_tx: tokio::sync::watch::Sender<ProcessState>,
    streams: Streams,
}

impl ProcessInner {
    pub(crate) const fn pid(&self) -> sys::process::ProcessId {
        self.pid
    }

    pub(crate) const fn streams(&self) -> &Streams {
        &self.streams
    }

    pub(crate) const fn target(&self) -> SignalTarget {
        self.target
    }

    /// Advances the lifecycle and wakes every waiter.
    pub(crate) fn transition(&self, state: ProcessState, outcome: Option<Outcome>) {
        let mut lifecycle = lock(&self.lifecycle);
        if state <= lifecycle.state {
            return;
        }

        lifecycle.state = state;
        if outcome.is_some() {
            lifecycle.outcome = outcome;
        }
        drop(lifecycle);

        tracing::debug!(target: trace_categories::MONITOR, pid = self.pid, "process is now {state}");

        self.changed.notify_all();
        self.state_tx.send_replace(state);
    }

    /// Blocks until the process stops running or `deadline` passes. Returns whether it is
    /// still running.
    pub(crate) fn wait_while_running_until(&self, deadline: Instant) -> bool {
        let mut lifecycle = lock(&self.lifecycle);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if lifecycle.state > ProcessState::Running || remaining.is_zero() {
                return lifecycle.state == ProcessState::Running;
            }
            (lifecycle, _) = wait_timeout_while(&self.changed, lifecycle, remaining, |l| {
                l.state == ProcessState::Running
            });
        }
    }

    /// Sends the forced kill unless the process already stopped running. The check and the
    /// delivery happen under the lifecycle lock, so the signal never reaches a reaped pid.
    pub(crate) fn kill_if_running(&self) -> Result<(), Error> {
        let lifecycle = lock(&self.lifecycle);
        if lifecycle.state == ProcessState::Running {
            self.target.kill()?;
        }
        Ok(())
    }

    fn exit_value(lifecycle: &Lifecycle, pid: sys::process::ProcessId) -> Result<i32, Error> {
        match &lifecycle.outcome {
            Some(Outcome::Exited(code)) => Ok(*code),
            Some(Outcome::Lost(reason)) => Err(Error::MonitorFailed {
                pid,
                reason: reason.clone(),
            }),
            None => Err(StateError::NotYetTerminated.into()),
        }
    }
}

/// Handle to a spawned process. Cheap to clone; all clones observe the same process.
#[derive(Clone, Debug)]
pub struct ProcessHandle {
    inner: Arc<ProcessInner>,
}

impl ProcessHandle {
    pub(crate) fn new(
        pid: sys::process::ProcessId,
        pgid: sys::process::ProcessId,
        strategy: SpawnStrategy,
        config: SpawnConfig,
        streams: Streams,
    ) -> Self {
        let target = SignalTarget::for_child(pid, pgid, config.new_process_group);
        let (state_tx, _) = tokio::sync::watch::channel(ProcessState::Spawning);

        Self {
            inner: Arc::new(ProcessInner {
                pid,
                pgid,
                strategy,
                config,
                target,
                lifecycle: Mutex::new(Lifecycle {
                    state: ProcessState::Spawning,
                    outcome: None,
                    interrupt_sent_at: None,
                }),
                changed: Condvar::new(),
                state_tx,
                streams,
            }),
        }
    }

    pub(crate) const fn inner(&self) -> &Arc<ProcessInner> {
        &self.inner
    }

    /// Process ID of the child.
    pub fn pid(&self) -> i32 {
        self.inner.pid
    }

    /// Process group ID of the child. Equal to [`Self::pid`] exactly when the child was
    /// started in a new process group.
    pub fn pgid(&self) -> i32 {
        self.inner.pgid
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        lock(&self.inner.lifecycle).state
    }

    /// The concrete strategy used to launch the child.
    pub fn strategy(&self) -> SpawnStrategy {
        self.inner.strategy
    }

    /// The configuration the child was spawned with.
    pub fn config(&self) -> &SpawnConfig {
        &self.inner.config
    }

    /// Whether the process has not yet terminated. Never blocks.
    pub fn is_alive(&self) -> bool {
        self.state() < ProcessState::Terminated
    }

    /// The exit code, once the process has terminated.
    pub fn exit_value(&self) -> Result<i32, Error> {
        let lifecycle = lock(&self.inner.lifecycle);
        ProcessInner::exit_value(&lifecycle, self.inner.pid)
    }

    /// Blocks until the process is reaped and returns its exit code. Every waiter observes
    /// the same code.
    pub fn wait_for(&self) -> Result<i32, Error> {
        let lifecycle = wait_while(&self.inner.changed, lock(&self.inner.lifecycle), |l| {
            l.state != ProcessState::Reaped
        });
        ProcessInner::exit_value(&lifecycle, self.inner.pid)
    }

    /// Like [`Self::wait_for`], giving up after `timeout`. Returns `None` if the process was
    /// not reaped in time.
    pub fn wait_for_timeout(&self, timeout: Duration) -> Result<Option<i32>, Error> {
        let (lifecycle, _) = wait_timeout_while(
            &self.inner.changed,
            lock(&self.inner.lifecycle),
            timeout,
            |l| l.state != ProcessState::Reaped,
        );

        if lifecycle.state == ProcessState::Reaped {
            ProcessInner::exit_value(&lifecycle, self.inner.pid).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Waits asynchronously until the process is reaped and returns its exit code.
    pub async fn wait_async(&self) -> Result<i32, Error> {
        let mut state_rx = self.inner.state_tx.subscribe();
        state_rx
            .wait_for(|state| *state == ProcessState::Reaped)
            .await
            .map_err(|_| Error::MonitorFailed {
                pid: self.inner.pid,
                reason: "state channel closed".into(),
            })?;

        self.exit_value()
    }

    /// Requests termination: sends the cooperative signal now and the forced kill once the
    /// configured grace period has elapsed, if the process is still running by then.
    ///
    /// Never blocks and never touches the streams. Repeated calls, and calls after the
    /// process has terminated, do nothing.
    pub fn destroy(&self) -> Result<(), Error> {
        let mut lifecycle = lock(&self.inner.lifecycle);
        if lifecycle.state != ProcessState::Running || lifecycle.interrupt_sent_at.is_some() {
            return Ok(());
        }

        self.inner.target.interrupt()?;
        let sent_at = Instant::now();
        lifecycle.interrupt_sent_at = Some(sent_at);
        drop(lifecycle);

        tracing::debug!(
            target: trace_categories::SIGNALS,
            pid = self.inner.pid,
            "destroy requested; kill in {:?}",
            self.inner.config.kill_grace_period
        );

        signals::schedule_kill(
            Arc::clone(&self.inner),
            sent_at + self.inner.config.kill_grace_period,
        )
    }

    /// Sends an arbitrary signal to the process (or its group).
    pub fn signal(&self, signal: i32) -> Result<(), Error> {
        let lifecycle = lock(&self.inner.lifecycle);
        if lifecycle.state == ProcessState::Reaped {
            return Err(StateError::AlreadyReaped.into());
        }
        self.inner.target.send(signal)
    }

    /// The child's standard input.
    pub fn stdin(&self) -> &PipeWriter {
        &self.inner.streams.stdin
    }

    /// The child's standard output.
    pub fn stdout(&self) -> &PipeReader {
        &self.inner.streams.stdout
    }

    /// The child's standard error.
    pub fn stderr(&self) -> &PipeReader {
        &self.inner.streams.stderr
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::SpawnCommand;
    use crate::encoding::TextEncoding;
    use crate::pipes::StreamContext;

    fn untracked_handle() -> ProcessHandle {
        let context = StreamContext {
            name: "",
            pid: 4242,
            encoding: TextEncoding::Latin1,
            auto_close: true,
            group: None,
        };
        let streams = Streams {
            stdin: PipeWriter::closed(context),
            stdout: PipeReader::closed(context),
            stderr: PipeReader::closed(context),
        };

        let handle = ProcessHandle::new(
            4242,
            1,
            SpawnStrategy::ForkExec,
            SpawnConfig::new(SpawnCommand::line("true")),
            streams,
        );
        handle.inner().transition(ProcessState::Running, None);
        handle
    }

    fn is_monitor_failure<T>(result: Result<T, Error>) -> bool {
        matches!(result, Err(Error::MonitorFailed { pid: 4242, .. }))
    }

    #[tokio::test]
    async fn lost_tracking_surfaces_from_every_wait() -> anyhow::Result<()> {
        let handle = untracked_handle();
        assert_eq!(handle.wait_for_timeout(Duration::from_millis(10))?, None);

        handle.inner().transition(
            ProcessState::Terminated,
            Some(Outcome::Lost("waitid failed".into())),
        );
        assert!(!handle.is_alive());
        assert!(is_monitor_failure(handle.exit_value()));

        handle.inner().transition(ProcessState::Reaped, None);
        assert!(is_monitor_failure(handle.wait_for()));
        assert!(is_monitor_failure(handle.wait_for_timeout(Duration::from_millis(10))));
        assert!(is_monitor_failure(handle.wait_async().await));
        Ok(())
    }

    #[test]
    fn states_only_move_forward() {
        let handle = untracked_handle();
        handle
            .inner()
            .transition(ProcessState::Terminated, Some(Outcome::Exited(3)));
        handle.inner().transition(ProcessState::Running, None);

        assert_eq!(handle.state(), ProcessState::Terminated);
        assert_eq!(handle.exit_value().ok(), Some(3));
        assert_eq!(handle.state().to_string(), "TERMINATED");
    }

    #[test]
    fn destroy_after_termination_sends_nothing() -> anyhow::Result<()> {
        let handle = untracked_handle();
        handle
            .inner()
            .transition(ProcessState::Terminated, Some(Outcome::Exited(0)));

        handle.destroy()?;
        assert!(lock(&handle.inner.lifecycle).interrupt_sent_at.is_none());
        Ok(())
    }
}
