//! Validation and launch of child processes.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SpawnConfig;
use crate::encoding::TextEncoding;
use crate::error::{Error, SpawnError};
use crate::handle::{ProcessHandle, ProcessInner, ProcessState};
use crate::monitor;
use crate::pipes::{PipeReader, PipeWriter, StreamContext, Streams};
use crate::strategy;
use crate::sys;
use crate::sys::launch::{ChildEnd, ChildStdio, LaunchRequest};
use crate::trace_categories;

/// Spawns a child process as described by `config`.
///
/// Every check (command syntax, size ceilings, strategy support, program lookup) happens
/// before the OS is asked to create anything, so an error never leaves a partial process
/// behind. On success the returned handle is RUNNING and monitored.
///
/// # Arguments
///
/// * `config` - What to run and how.
pub fn spawn(config: &SpawnConfig) -> Result<ProcessHandle, Error> {
    let argv = config.command.to_argv()?;
    let environment = config.effective_environment();
    config.check_limits(&environment)?;

    let method = strategy::resolve(
        config.strategy,
        config.working_directory.is_some(),
        config.allow_chdir_on_spawn,
    )?;

    if let Some(dir) = &config.working_directory
        && !dir.is_dir()
    {
        return Err(SpawnError::NotFound(format!("working directory {}", dir.display())).into());
    }

    let program_name = argv
        .first()
        .ok_or_else(|| SpawnError::InvalidCommand("empty command".into()))?;
    let program = resolve_program(
        program_name,
        &environment,
        config.working_directory.as_deref(),
    )?;

    let (child_stdio, parent_ends) = create_stdio(config.pipe_stdio)?;

    let request = LaunchRequest {
        program,
        argv,
        environment,
        working_directory: config.working_directory.clone(),
        new_process_group: config.new_process_group,
    };

    let pid = sys::process::launch(method, &request, child_stdio)?;
    let pgid = if config.new_process_group {
        pid
    } else {
        sys::process::current_group()
    };

    tracing::debug!(
        target: trace_categories::SPAWN,
        pid,
        pgid,
        strategy = %method.as_strategy(),
        "spawned {}",
        request.program.display()
    );

    let encoding = TextEncoding::resolve(config.file_encoding.as_deref());
    let streams = parent_ends.into_streams(StreamContext {
        name: "",
        pid,
        encoding,
        auto_close: config.auto_close_input_streams,
        group: config.new_process_group.then_some(pgid),
    });

    let handle = ProcessHandle::new(pid, pgid, method.as_strategy(), config.clone(), streams);
    handle.inner().transition(ProcessState::Running, None);

    if let Err(e) = monitor::start(Arc::clone(handle.inner())) {
        abandon(handle.inner());
        return Err(e);
    }

    Ok(handle)
}

/// Finds the executable for `name`. Names containing a path separator are taken as paths
/// (relative to the child's working directory); bare names are searched on the child's
/// `PATH`.
fn resolve_program(
    name: &str,
    environment: &[(OsString, OsString)],
    working_directory: Option<&Path>,
) -> Result<PathBuf, SpawnError> {
    let base = match working_directory {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().unwrap_or_default(),
    };

    if name.contains('/') {
        return Ok(base.join(name));
    }

    let search_path = environment
        .iter()
        .find(|(var, _)| var == OsStr::new("PATH"))
        .map(|(_, value)| value.clone())
        .or_else(|| std::env::var_os("PATH"));

    which::which_in(name, search_path, &base).map_err(|e| {
        tracing::debug!(target: trace_categories::SPAWN, "lookup of {name} failed: {e}");
        SpawnError::NotFound(name.to_owned())
    })
}

/// Parent-side ends of the child's stdio, before they are wrapped into streams.
enum ParentEnds {
    Piped {
        stdin: os_pipe::PipeWriter,
        stdout: os_pipe::PipeReader,
        stderr: os_pipe::PipeReader,
    },
    Closed,
}

impl ParentEnds {
    fn into_streams(self, context: StreamContext) -> Streams {
        let named = |name| StreamContext { name, ..context };

        match self {
            Self::Piped {
                stdin,
                stdout,
                stderr,
            } => Streams {
                stdin: PipeWriter::new(stdin, named("stdin")),
                stdout: PipeReader::new(stdout, named("stdout")),
                stderr: PipeReader::new(stderr, named("stderr")),
            },
            Self::Closed => Streams {
                stdin: PipeWriter::closed(named("stdin")),
                stdout: PipeReader::closed(named("stdout")),
                stderr: PipeReader::closed(named("stderr")),
            },
        }
    }
}

fn create_stdio(pipe_stdio: bool) -> Result<(ChildStdio, ParentEnds), Error> {
    if !pipe_stdio {
        let null = sys::fd::open_null()?;
        let child = ChildStdio {
            stdin: ChildEnd::Null(null.try_clone()?),
            stdout: ChildEnd::Null(null.try_clone()?),
            stderr: ChildEnd::Null(null),
        };
        return Ok((child, ParentEnds::Closed));
    }

    let (stdin_reader, stdin_writer) = os_pipe::pipe()?;
    let (stdout_reader, stdout_writer) = os_pipe::pipe()?;
    let (stderr_reader, stderr_writer) = os_pipe::pipe()?;

    let child = ChildStdio {
        stdin: ChildEnd::Reader(stdin_reader),
        stdout: ChildEnd::Writer(stdout_writer),
        stderr: ChildEnd::Writer(stderr_writer),
    };
    let parent = ParentEnds::Piped {
        stdin: stdin_writer,
        stdout: stdout_reader,
        stderr: stderr_reader,
    };

    Ok((child, parent))
}

/// Kills and collects a child that cannot be monitored.
fn abandon(process: &ProcessInner) {
    let pid = process.pid();
    tracing::error!(target: trace_categories::SPAWN, pid, "cannot monitor child; killing it");

    if let Err(e) = process.target().kill() {
        tracing::warn!(target: trace_categories::SPAWN, pid, "failed to kill: {e}");
    }
    if let Err(e) = sys::process::collect(pid) {
        tracing::warn!(target: trace_categories::SPAWN, pid, "failed to collect: {e}");
    }
    process.streams().on_process_exit();
    process.transition(
        ProcessState::Reaped,
        Some(crate::handle::Outcome::Lost("monitor could not be started".into())),
    );
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn paths_resolve_against_the_working_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let resolved = resolve_program("./tool", &[], Some(dir.path()))?;
        assert_eq!(resolved, dir.path().join("./tool"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn bare_names_search_the_child_path() -> anyhow::Result<()> {
        let environment = vec![(OsString::from("PATH"), OsString::from("/bin:/usr/bin"))];
        let resolved = resolve_program("sh", &environment, None)?;
        assert!(resolved.ends_with("sh"));

        let empty_path = vec![(OsString::from("PATH"), OsString::from(""))];
        assert!(matches!(
            resolve_program("sh", &empty_path, None),
            Err(SpawnError::NotFound(name)) if name == "sh"
        ));
        Ok(())
    }
}
