//! Spawn configuration.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SpawnError;
use crate::strategy::SpawnStrategy;

/// The program to run, either as a command line or as an argument vector.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnCommand {
    /// A command line, split into arguments with POSIX shell quoting rules. No shell is
    /// involved: no expansion, redirection or pipelines.
    Line(String),
    /// A program followed by its arguments, passed through verbatim.
    Argv(Vec<String>),
}

impl SpawnCommand {
    /// Creates a command from a command line.
    pub fn line(line: impl Into<String>) -> Self {
        Self::Line(line.into())
    }

    /// Creates a command from a program and its arguments.
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Argv(args.into_iter().map(Into::into).collect())
    }

    /// Length of the command line as the OS would see it: every argument joined by a single
    /// separator.
    pub fn command_line_len(&self) -> usize {
        match self {
            Self::Line(line) => line.len(),
            Self::Argv(args) => {
                args.iter().map(String::len).sum::<usize>() + args.len().saturating_sub(1)
            }
        }
    }

    /// Splits the command into its argument vector.
    pub(crate) fn to_argv(&self) -> Result<Vec<String>, SpawnError> {
        let argv = match self {
            Self::Line(line) => shlex::split(line).ok_or_else(|| {
                SpawnError::InvalidCommand(format!("unbalanced quoting in '{line}'"))
            })?,
            Self::Argv(args) => args.clone(),
        };

        match argv.first() {
            None => Err(SpawnError::InvalidCommand("empty command".into())),
            Some(program) if program.is_empty() => {
                Err(SpawnError::InvalidCommand("empty program name".into()))
            }
            Some(_) => Ok(argv),
        }
    }
}

/// Size ceilings enforced before launching, so oversize requests fail with a structured error
/// instead of being truncated or rejected ambiguously by the OS.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SpawnLimits {
    /// Maximum length of the combined command line, in bytes.
    pub max_command_line: usize,
    /// Maximum length of any single environment value, in bytes.
    pub max_environment_value: usize,
}

impl SpawnLimits {
    /// Ceiling for the combined command line on the reference platform.
    pub const DEFAULT_MAX_COMMAND_LINE: usize = 32766;
    /// Ceiling for a single environment value on the reference platform.
    pub const DEFAULT_MAX_ENVIRONMENT_VALUE: usize = 32767;
}

impl Default for SpawnLimits {
    fn default() -> Self {
        Self {
            max_command_line: Self::DEFAULT_MAX_COMMAND_LINE,
            max_environment_value: Self::DEFAULT_MAX_ENVIRONMENT_VALUE,
        }
    }
}

/// Everything needed to launch and manage one child process.
///
/// | field | default |
/// |---|---|
/// | `environment` | empty (inherit the host environment unchanged) |
/// | `clear_environment` | `false` |
/// | `working_directory` | `None` (inherit the host's) |
/// | `new_process_group` | `false` |
/// | `auto_close_input_streams` | `true` |
/// | `strategy` | [`SpawnStrategy::Dynamic`] |
/// | `allow_chdir_on_spawn` | `false` |
/// | `pipe_stdio` | `true` |
/// | `kill_grace_period` | 5 seconds |
/// | `file_encoding` | `None` |
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// What to run.
    pub command: SpawnCommand,
    /// Variables added to (or overriding) the child's environment.
    pub environment: BTreeMap<String, String>,
    /// Start from an empty environment instead of the host's.
    pub clear_environment: bool,
    /// Directory the child starts in.
    pub working_directory: Option<PathBuf>,
    /// Make the child the leader of a new process group; stop/kill requests then reach the
    /// whole group.
    pub new_process_group: bool,
    /// Release blocked readers of the child's output once it terminates, even when a
    /// detached descendant keeps the pipe open.
    pub auto_close_input_streams: bool,
    /// Launch strategy to use.
    pub strategy: SpawnStrategy,
    /// Permit changing the parent's working directory around a `posix_spawn` launch.
    pub allow_chdir_on_spawn: bool,
    /// Connect the child's stdio to pipes; when `false` the child gets the null device and
    /// the handle's streams start out closed.
    pub pipe_stdio: bool,
    /// Time between the cooperative stop and the forced kill issued by `destroy`.
    pub kill_grace_period: Duration,
    /// Encoding label used for text helpers when the locale does not name one.
    pub file_encoding: Option<String>,
    /// Size ceilings.
    pub limits: SpawnLimits,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            command: SpawnCommand::Argv(vec![]),
            environment: BTreeMap::new(),
            clear_environment: false,
            working_directory: None,
            new_process_group: false,
            auto_close_input_streams: true,
            strategy: SpawnStrategy::Dynamic,
            allow_chdir_on_spawn: false,
            pipe_stdio: true,
            kill_grace_period: Self::DEFAULT_KILL_GRACE_PERIOD,
            file_encoding: None,
            limits: SpawnLimits::default(),
        }
    }
}

impl SpawnConfig {
    /// Default time between the cooperative stop and the forced kill.
    pub const DEFAULT_KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

    /// Returns a configuration with defaults for everything but the command.
    pub fn new(command: SpawnCommand) -> Self {
        Self {
            command,
            ..Self::default()
        }
    }

    /// Sets the launch strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: SpawnStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets whether the child leads a new process group.
    #[must_use]
    pub fn with_new_process_group(mut self, new_process_group: bool) -> Self {
        self.new_process_group = new_process_group;
        self
    }

    /// Sets whether blocked readers are released when the child terminates.
    #[must_use]
    pub fn with_auto_close_input_streams(mut self, auto_close: bool) -> Self {
        self.auto_close_input_streams = auto_close;
        self
    }

    /// Sets the child's working directory.
    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Sets whether `posix_spawn` launches may change the parent's directory.
    #[must_use]
    pub fn with_allow_chdir_on_spawn(mut self, allow: bool) -> Self {
        self.allow_chdir_on_spawn = allow;
        self
    }

    /// Adds or overrides one environment variable.
    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    /// Starts the child from an empty environment.
    #[must_use]
    pub fn with_clear_environment(mut self, clear: bool) -> Self {
        self.clear_environment = clear;
        self
    }

    /// Sets whether the child's stdio is piped.
    #[must_use]
    pub fn with_pipe_stdio(mut self, pipe_stdio: bool) -> Self {
        self.pipe_stdio = pipe_stdio;
        self
    }

    /// Sets the kill escalation grace period.
    #[must_use]
    pub fn with_kill_grace_period(mut self, grace: Duration) -> Self {
        self.kill_grace_period = grace;
        self
    }

    /// Sets the size ceilings.
    #[must_use]
    pub fn with_limits(mut self, limits: SpawnLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Computes the environment the child will receive, with host variables first and
    /// configured overrides applied on top.
    pub(crate) fn effective_environment(&self) -> Vec<(OsString, OsString)> {
        let mut merged: BTreeMap<OsString, OsString> = if self.clear_environment {
            BTreeMap::new()
        } else {
            std::env::vars_os().collect()
        };

        for (name, value) in &self.environment {
            merged.insert(name.into(), value.into());
        }

        merged.into_iter().collect()
    }

    /// Checks the size ceilings against the command and the environment the child would get.
    pub(crate) fn check_limits(&self, env: &[(OsString, OsString)]) -> Result<(), SpawnError> {
        let length = self.command.command_line_len();
        if length > self.limits.max_command_line {
            return Err(SpawnError::ArgumentListTooLong {
                length,
                limit: self.limits.max_command_line,
            });
        }

        for (name, value) in env {
            if value.len() > self.limits.max_environment_value {
                return Err(SpawnError::EnvironmentValueTooLong {
                    name: name.to_string_lossy().into_owned(),
                    length: value.len(),
                    limit: self.limits.max_environment_value,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn command_line_splits_with_shell_quoting() {
        let cmd = SpawnCommand::line(r#"printf "%s|" "a b" c"#);
        assert_eq!(
            cmd.to_argv().ok(),
            Some(vec!["printf".to_string(), "%s|".into(), "a b".into(), "c".into()])
        );
    }

    #[test]
    fn empty_and_malformed_commands_are_rejected() {
        assert!(matches!(
            SpawnCommand::line("   ").to_argv(),
            Err(SpawnError::InvalidCommand(_))
        ));
        assert!(matches!(
            SpawnCommand::line("echo 'unterminated").to_argv(),
            Err(SpawnError::InvalidCommand(_))
        ));
        assert!(matches!(
            SpawnCommand::argv([""]).to_argv(),
            Err(SpawnError::InvalidCommand(_))
        ));
    }

    #[test]
    fn argv_length_counts_separators() {
        assert_eq!(SpawnCommand::argv(["ab", "cde", "f"]).command_line_len(), 8);
        assert_eq!(SpawnCommand::line("ab cde f").command_line_len(), 8);
    }

    #[test]
    fn command_line_ceiling_is_inclusive() {
        let limits = SpawnLimits::default();
        let exact = SpawnCommand::Line("x".repeat(limits.max_command_line));
        let over = SpawnCommand::Line("x".repeat(limits.max_command_line + 1));

        assert!(SpawnConfig::new(exact).check_limits(&[]).is_ok());
        assert_eq!(
            SpawnConfig::new(over).check_limits(&[]),
            Err(SpawnError::ArgumentListTooLong {
                length: 32767,
                limit: 32766
            })
        );
    }

    #[test]
    fn environment_value_ceiling_is_inclusive() {
        let config = SpawnConfig::new(SpawnCommand::line("true"));
        let at: Vec<(OsString, OsString)> = vec![("BIG".into(), "v".repeat(32767).into())];
        let over: Vec<(OsString, OsString)> = vec![("BIG".into(), "v".repeat(32768).into())];

        assert!(config.check_limits(&at).is_ok());
        assert!(matches!(
            config.check_limits(&over),
            Err(SpawnError::EnvironmentValueTooLong { length: 32768, .. })
        ));
    }

    #[test]
    fn cleared_environment_holds_only_overrides() {
        let config = SpawnConfig::new(SpawnCommand::line("env"))
            .with_clear_environment(true)
            .with_env("ONLY", "1");

        assert_eq!(
            config.effective_environment(),
            vec![(OsString::from("ONLY"), OsString::from("1"))]
        );
    }

    #[test]
    fn overrides_replace_inherited_values() {
        let config = SpawnConfig::new(SpawnCommand::line("env")).with_env("PATH", "/nowhere");
        let env = config.effective_environment();

        let paths: Vec<_> = env.iter().filter(|(name, _)| name == "PATH").collect();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].1, OsString::from("/nowhere"));
    }

    #[test]
    fn config_deserializes_with_defaults() -> anyhow::Result<()> {
        let config: SpawnConfig = serde_json::from_str(
            r#"{"command":{"line":"sleep 1"},"strategy":"fork_exec","new_process_group":true}"#,
        )?;

        assert_eq!(config.command, SpawnCommand::line("sleep 1"));
        assert_eq!(config.strategy, SpawnStrategy::ForkExec);
        assert!(config.new_process_group);
        assert!(config.auto_close_input_streams);
        assert_eq!(config.kill_grace_period, SpawnConfig::DEFAULT_KILL_GRACE_PERIOD);
        assert_eq!(config.limits, SpawnLimits::default());
        Ok(())
    }
}
