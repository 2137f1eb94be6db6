//! Launch primitives: `fork`/`vfork` followed by `execve`, and `posix_spawn`.
//!
//! Everything the child needs is prepared in the parent before the process is duplicated.
//! Between `fork` and `execve` the child only makes raw, async-signal-safe libc calls. When
//! any of them fails it writes its `errno` to a close-on-exec error pipe and exits with 127;
//! the parent reads that pipe to distinguish a failed exec from a running program.

use std::ffi::CString;
use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::RwLock;

use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::{SigSet, Signal};
use nix::unistd::Pid;

use crate::error::{Error, SpawnError};
use crate::results;
use crate::sys::launch::{ChildStdio, LaunchRequest};
use crate::sys::process::{self, ProcessId};
use crate::trace_categories;

/// Guards the parent's working directory. Every launch holds it for reading; a launch that
/// temporarily changes the parent's directory holds it for writing, so no other child can be
/// started while the directory is displaced.
static PARENT_CWD: RwLock<()> = RwLock::new(());

/// The C-level image handed to `execve`/`posix_spawn`.
pub(super) struct ExecImage {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    working_directory: Option<CString>,
}

impl ExecImage {
    pub(super) fn new(request: &LaunchRequest) -> Result<Self, SpawnError> {
        let program = to_cstring(request.program.as_os_str().as_bytes(), "program path")?;

        let argv = request
            .argv
            .iter()
            .map(|arg| to_cstring(arg.as_bytes(), "argument"))
            .collect::<Result<Vec<_>, _>>()?;

        let envp = request
            .environment
            .iter()
            .map(|(name, value)| {
                let mut entry = name.as_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                to_cstring(&entry, "environment entry")
            })
            .collect::<Result<Vec<_>, _>>()?;

        let working_directory = request
            .working_directory
            .as_deref()
            .map(|dir| to_cstring(dir.as_os_str().as_bytes(), "working directory"))
            .transpose()?;

        Ok(Self {
            program,
            argv,
            envp,
            working_directory,
        })
    }
}

fn to_cstring(bytes: &[u8], what: &str) -> Result<CString, SpawnError> {
    CString::new(bytes).map_err(|_| SpawnError::InvalidCommand(format!("{what} contains a NUL byte")))
}

/// Null-terminated pointer array over `strings`, valid while `strings` lives.
fn pointer_array(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// Raw inputs of the child between `fork` and `execve`. Pointers borrow from an
/// [`ExecImage`] and pointer arrays that outlive the child's use of them.
struct ChildContext {
    program: *const libc::c_char,
    argv: *const *const libc::c_char,
    envp: *const *const libc::c_char,
    working_directory: *const libc::c_char,
    stdio: [RawFd; 3],
    error_fd: RawFd,
    new_process_group: bool,
    sigmask: libc::sigset_t,
}

/// Runs in the child after `fork`/`vfork`. Never returns.
#[allow(clippy::multiple_unsafe_ops_per_block)]
fn exec_child(ctx: &ChildContext) -> ! {
    // SAFETY: only async-signal-safe libc calls on memory prepared by the parent.
    unsafe {
        libc::pthread_sigmask(libc::SIG_SETMASK, &raw const ctx.sigmask, std::ptr::null_mut());
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);

        if ctx.new_process_group && libc::setpgid(0, 0) != 0 {
            fail_child(ctx.error_fd);
        }

        for (target, &source) in (0..).zip(ctx.stdio.iter()) {
            let rc = if source == target {
                libc::fcntl(source, libc::F_SETFD, 0)
            } else {
                libc::dup2(source, target)
            };
            if rc < 0 {
                fail_child(ctx.error_fd);
            }
        }

        if !ctx.working_directory.is_null() && libc::chdir(ctx.working_directory) != 0 {
            fail_child(ctx.error_fd);
        }

        libc::execve(ctx.program, ctx.argv, ctx.envp);
        fail_child(ctx.error_fd)
    }
}

/// Reports `errno` through the error pipe and exits the child.
#[allow(clippy::multiple_unsafe_ops_per_block)]
unsafe fn fail_child(error_fd: RawFd) -> ! {
    let errno = std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO);
    let bytes = errno.to_ne_bytes();

    // SAFETY: write and _exit are async-signal-safe; the buffer lives on this stack frame.
    unsafe {
        libc::write(error_fd, bytes.as_ptr().cast(), bytes.len());
        libc::_exit(results::COMMAND_NOT_FOUND)
    }
}

#[derive(Clone, Copy)]
pub(super) enum Duplicate {
    Fork,
    #[cfg(target_os = "linux")]
    Vfork,
}

/// Launches with `fork` or `vfork` followed by `execve`.
pub(super) fn fork_exec(
    mode: Duplicate,
    request: &LaunchRequest,
    image: &ExecImage,
    stdio: ChildStdio,
) -> Result<ProcessId, Error> {
    let argv = pointer_array(&image.argv);
    let envp = pointer_array(&image.envp);
    let (mut error_reader, error_writer) = os_pipe::pipe()?;

    let ctx = ChildContext {
        program: image.program.as_ptr(),
        argv: argv.as_ptr(),
        envp: envp.as_ptr(),
        working_directory: image
            .working_directory
            .as_ref()
            .map_or(std::ptr::null(), |dir| dir.as_ptr()),
        stdio: stdio.raw_fds(),
        error_fd: error_writer.as_raw_fd(),
        new_process_group: request.new_process_group,
        sigmask: *SigSet::empty().as_ref(),
    };

    let pid = {
        let _cwd = PARENT_CWD
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        match mode {
            // SAFETY: the child only runs exec_child, which never returns.
            Duplicate::Fork => unsafe { libc::fork() },
            // SAFETY: as above; exec_child does not touch memory shared with the suspended
            // parent beyond reading the prepared context.
            #[cfg(target_os = "linux")]
            Duplicate::Vfork => unsafe { libc::vfork() },
        }
    };

    match pid {
        -1 => Err(std::io::Error::last_os_error().into()),
        0 => exec_child(&ctx),
        child => {
            drop(error_writer);
            drop(stdio);

            if request.new_process_group {
                // The child does the same; whichever runs first wins. EACCES after the
                // child's exec is expected.
                let _ = nix::unistd::setpgid(Pid::from_raw(child), Pid::from_raw(child));
            }

            match read_child_errno(&mut error_reader) {
                Ok(None) => Ok(child),
                Ok(Some(errno)) => {
                    // The child exits with 127 right after reporting.
                    collect_quietly(child);
                    Err(launch_error(Errno::from_raw(errno), &request.program))
                }
                Err(e) => {
                    let _ = nix::sys::signal::kill(Pid::from_raw(child), Signal::SIGKILL);
                    collect_quietly(child);
                    Err(e)
                }
            }
        }
    }
}

fn read_child_errno(reader: &mut os_pipe::PipeReader) -> Result<Option<i32>, Error> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(i32::from_ne_bytes(buf))),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Collects a child that failed to launch, so it does not linger as a zombie.
fn collect_quietly(pid: ProcessId) {
    if let Err(e) = process::collect(pid) {
        tracing::warn!(target: trace_categories::SPAWN, pid, "failed to collect failed child: {e}");
    }
}

/// Launches with `posix_spawn`. A working directory is applied by temporarily changing the
/// parent's.
#[cfg(any(
    target_os = "freebsd",
    target_os = "haiku",
    target_os = "linux",
    target_os = "netbsd",
    target_vendor = "apple"
))]
pub(super) fn posix_spawn(
    request: &LaunchRequest,
    image: &ExecImage,
    stdio: ChildStdio,
) -> Result<ProcessId, Error> {
    use nix::spawn::{PosixSpawnAttr, PosixSpawnFileActions, PosixSpawnFlags};

    let mut actions = PosixSpawnFileActions::init()?;
    for (target, source) in (0..).zip(stdio.raw_fds()) {
        actions.add_dup2(source, target)?;
    }

    let mut flags =
        PosixSpawnFlags::POSIX_SPAWN_SETSIGMASK | PosixSpawnFlags::POSIX_SPAWN_SETSIGDEF;
    let mut attr = PosixSpawnAttr::init()?;
    if request.new_process_group {
        flags |= PosixSpawnFlags::POSIX_SPAWN_SETPGROUP;
        attr.set_pgroup(Pid::from_raw(0))?;
    }

    let mut sigdefault = SigSet::empty();
    sigdefault.add(Signal::SIGPIPE);
    attr.set_sigmask(&SigSet::empty())?;
    attr.set_sigdefault(&sigdefault)?;
    attr.set_flags(flags)?;

    let spawn = || {
        nix::spawn::posix_spawn(
            image.program.as_c_str(),
            &actions,
            &attr,
            image.argv.as_slice(),
            image.envp.as_slice(),
        )
    };

    let result = match request.working_directory.as_deref() {
        None => {
            let _cwd = PARENT_CWD
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            spawn()
        }
        Some(dir) => {
            let _cwd = PARENT_CWD
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let _displaced = DisplacedCwd::enter(dir)?;
            spawn()
        }
    };

    drop(stdio);

    result
        .map(Pid::as_raw)
        .map_err(|errno| launch_error(errno, &request.program))
}

/// Moves the parent into a directory for the duration of a launch and moves it back on drop.
struct DisplacedCwd {
    original: std::path::PathBuf,
}

impl DisplacedCwd {
    fn enter(dir: &Path) -> Result<Self, Error> {
        let original = std::env::current_dir()?;
        std::env::set_current_dir(dir)?;
        tracing::debug!(target: trace_categories::SPAWN, "moved parent into {} for launch", dir.display());
        Ok(Self { original })
    }
}

impl Drop for DisplacedCwd {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.original) {
            tracing::error!(
                target: trace_categories::SPAWN,
                "failed to restore working directory {}: {e}",
                self.original.display()
            );
        }
    }
}

/// Maps the `errno` of a failed launch to a spawn error.
fn launch_error(errno: Errno, program: &Path) -> Error {
    match errno {
        Errno::ENOENT | Errno::ENOTDIR => {
            SpawnError::NotFound(program.display().to_string()).into()
        }
        Errno::EACCES | Errno::EPERM => SpawnError::PermissionDenied(program.to_path_buf()).into(),
        other => Error::ErrnoError(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_errors_map_to_spawn_errors() {
        let program = Path::new("/opt/tool");

        assert!(matches!(
            launch_error(Errno::ENOENT, program),
            Error::Spawn(SpawnError::NotFound(_))
        ));
        assert!(matches!(
            launch_error(Errno::EACCES, program),
            Error::Spawn(SpawnError::PermissionDenied(_))
        ));
        assert!(matches!(
            launch_error(Errno::E2BIG, program),
            Error::ErrnoError(Errno::E2BIG)
        ));
    }
}
