//! Core of procwarden: a child-process lifecycle manager. Spawns external programs through a
//! selectable OS launch strategy, tracks their identity and termination, delivers stop/kill
//! escalation to single processes or whole process groups, and exposes their standard I/O as
//! streams that stay drainable even when the child exits before anyone reads them.
//!
//! ```no_run
//! use procwarden_core::{SpawnCommand, SpawnConfig};
//!
//! let config = SpawnConfig::new(SpawnCommand::line("echo hello"));
//! let child = procwarden_core::spawn(&config)?;
//! let output = child.stdout().read_text()?;
//! assert_eq!(output, "hello\n");
//! assert_eq!(child.wait_for()?, 0);
//! # Ok::<(), procwarden_core::Error>(())
//! ```

mod config;
mod encoding;
mod error;
mod handle;
mod locks;
mod monitor;
mod pipes;
pub mod results;
mod signals;
mod spawner;
mod strategy;
mod sys;
mod trace_categories;

pub use config::{SpawnCommand, SpawnConfig, SpawnLimits};
pub use encoding::TextEncoding;
pub use error::{Error, PlatformLimitation, SpawnError, StateError, StreamError};
pub use handle::{ProcessHandle, ProcessState};
pub use pipes::{PipeReader, PipeWriter};
pub use spawner::spawn;
pub use strategy::{PlatformCapabilities, SpawnStrategy, capabilities};
