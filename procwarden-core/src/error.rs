use std::path::PathBuf;

use crate::strategy::SpawnStrategy;

/// Monolithic error type for process management.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The child could not be launched.
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// A stream operation was rejected.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The operation is not valid in the process's current lifecycle state.
    #[error(transparent)]
    State(#[from] StateError),

    /// The platform lacks a capability the operation requires.
    #[error(transparent)]
    Platform(#[from] PlatformLimitation),

    /// Termination tracking for the process was lost; the exit code is unknown.
    #[error("lost track of process {pid}: {reason}")]
    MonitorFailed {
        /// The process whose tracking failed.
        pid: i32,
        /// Why tracking failed.
        reason: String,
    },

    /// The process could not be signaled.
    #[error("failed to send signal {signal} to {target}")]
    FailedToSendSignal {
        /// Raw signal number.
        signal: i32,
        /// Description of the target (process or group).
        target: String,
    },

    /// An I/O error occurred.
    #[error("i/o error: {0}")]
    IoError(#[from] std::io::Error),

    /// A system error occurred.
    #[cfg(unix)]
    #[error("system error: {0}")]
    ErrnoError(#[from] nix::errno::Errno),
}

/// Errors detected before or at the OS launch call. None of them leaves a partial process
/// running.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    /// The requested strategy is not available here, or cannot honor the requested options.
    #[error("spawn strategy {strategy} unsupported: {reason}")]
    UnsupportedStrategy {
        /// The strategy that was requested.
        strategy: SpawnStrategy,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The executable could not be found.
    #[error("command not found: {0}")]
    NotFound(String),

    /// The executable exists but may not be executed.
    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// The combined command line exceeds the configured ceiling.
    #[error("argument list too long: {length} bytes exceeds limit of {limit}")]
    ArgumentListTooLong {
        /// Length of the combined command line.
        length: usize,
        /// Configured ceiling.
        limit: usize,
    },

    /// An environment value exceeds the configured ceiling.
    #[error("environment value for {name} too long: {length} bytes exceeds limit of {limit}")]
    EnvironmentValueTooLong {
        /// Name of the offending variable.
        name: String,
        /// Length of its value.
        length: usize,
        /// Configured ceiling.
        limit: usize,
    },

    /// The command is empty or contains bytes the OS cannot pass (NUL).
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

/// Errors reported by pipe stream operations.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// The stream was closed and holds no buffered data.
    #[error("stream is closed")]
    Closed,

    /// An offset/length pair does not fit the supplied buffer.
    #[error("invalid buffer arguments: offset {offset} + length {length} exceeds {capacity}")]
    InvalidBufferArguments {
        /// Requested start offset.
        offset: usize,
        /// Requested length.
        length: usize,
        /// Size of the buffer.
        capacity: usize,
    },
}

/// Errors raised by lifecycle-dependent queries.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    /// The process has not terminated yet.
    #[error("process has not yet terminated")]
    NotYetTerminated,

    /// The process has already been reaped.
    #[error("process has already been reaped")]
    AlreadyReaped,
}

/// Capabilities this platform does not provide.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformLimitation {
    /// The launch primitive behind the strategy does not exist on this platform.
    #[error("spawn strategy {0} is unavailable on this platform")]
    StrategyUnavailable(SpawnStrategy),

    /// Signals cannot be delivered to a whole process group, so detached sub-children may
    /// outlive a destroy request.
    #[error("process group signals are unsupported; detached children may not be reached")]
    GroupSignalUnsupportedForDetachedChild,
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::IoError(inner) => inner,
            Error::Stream(StreamError::Closed) => {
                Self::new(std::io::ErrorKind::BrokenPipe, StreamError::Closed)
            }
            Error::Stream(inner @ StreamError::InvalidBufferArguments { .. }) => {
                Self::new(std::io::ErrorKind::InvalidInput, inner)
            }
            other => Self::other(other),
        }
    }
}
