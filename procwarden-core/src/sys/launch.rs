//! Platform-neutral description of a launch.

use std::ffi::OsString;
use std::fs::File;
use std::path::PathBuf;

/// Everything the platform layer needs to start a child.
#[derive(Debug)]
pub(crate) struct LaunchRequest {
    /// Absolute path of the executable.
    pub program: PathBuf,
    /// Full argument vector, including `argv[0]`.
    pub argv: Vec<String>,
    /// Complete environment of the child.
    pub environment: Vec<(OsString, OsString)>,
    pub working_directory: Option<PathBuf>,
    pub new_process_group: bool,
}

/// One child-side standard stream.
#[derive(Debug)]
pub(crate) enum ChildEnd {
    Reader(os_pipe::PipeReader),
    Writer(os_pipe::PipeWriter),
    Null(File),
}

/// The descriptors installed as the child's stdin, stdout and stderr. Dropped in the parent
/// once the launch call returns.
#[derive(Debug)]
pub(crate) struct ChildStdio {
    pub stdin: ChildEnd,
    pub stdout: ChildEnd,
    pub stderr: ChildEnd,
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for ChildEnd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        match self {
            Self::Reader(reader) => reader.as_raw_fd(),
            Self::Writer(writer) => writer.as_raw_fd(),
            Self::Null(file) => file.as_raw_fd(),
        }
    }
}

#[cfg(unix)]
impl ChildStdio {
    /// Raw descriptors in target order (0, 1, 2).
    pub(crate) fn raw_fds(&self) -> [std::os::fd::RawFd; 3] {
        use std::os::fd::AsRawFd;
        [
            self.stdin.as_raw_fd(),
            self.stdout.as_raw_fd(),
            self.stderr.as_raw_fd(),
        ]
    }
}
