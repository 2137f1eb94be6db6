//! Launching children across strategies, and everything that must be refused before launch.

#![cfg(unix)]
#![allow(clippy::panic_in_result_fn)]

mod common;

use std::path::Path;

use anyhow::Context;
use pretty_assertions::assert_eq;
use procwarden_core::{
    Error, SpawnCommand, SpawnConfig, SpawnError, SpawnLimits, SpawnStrategy, results,
};

use common::{TestContext, shell, supported_strategies};

#[test]
fn echo_in_shared_group() -> anyhow::Result<()> {
    for strategy in supported_strategies() {
        let ctx = TestContext::new(strategy);
        let child = ctx.spawn(&ctx.config(SpawnCommand::line("echo hello")))?;

        assert!(child.pid() > 0);
        assert_ne!(child.pid(), child.pgid(), "{strategy}");
        assert_eq!(child.stdout().read_text()?, "hello\n", "{strategy}");
        assert_eq!(child.wait_for()?, results::SUCCESS, "{strategy}");
        assert_ne!(child.strategy(), SpawnStrategy::Dynamic);
    }
    Ok(())
}

#[test]
fn new_group_makes_child_its_leader() -> anyhow::Result<()> {
    for strategy in supported_strategies() {
        let ctx = TestContext::new(strategy);
        let config = ctx
            .config(SpawnCommand::argv(["sh", "-c", "ps -o pgid= -p $$ || echo none"]))
            .with_new_process_group(true);
        let child = ctx.spawn(&config)?;

        assert_eq!(child.pid(), child.pgid(), "{strategy}");
        let reported = child.stdout().read_text()?;
        if reported.trim() != "none" {
            assert_eq!(reported.trim(), child.pgid().to_string(), "{strategy}");
        }
        assert_eq!(child.wait_for()?, 0);
    }
    Ok(())
}

#[test]
fn unsupported_strategies_are_refused() {
    for strategy in [
        SpawnStrategy::ForkExec,
        SpawnStrategy::VforkExec,
        SpawnStrategy::PosixSpawn,
    ] {
        let result = procwarden_core::spawn(
            &SpawnConfig::new(SpawnCommand::line("true")).with_strategy(strategy),
        );

        if strategy.is_supported() {
            assert!(result.is_ok(), "{strategy}");
            if let Ok(child) = result {
                assert_eq!(child.strategy(), strategy);
                assert!(child.wait_for().is_ok());
            }
        } else {
            assert!(matches!(
                result,
                Err(Error::Spawn(SpawnError::UnsupportedStrategy { .. }))
            ));
        }
    }
}

#[test]
fn exit_status_is_reported() -> anyhow::Result<()> {
    let ctx = TestContext::new(SpawnStrategy::Dynamic);
    let child = ctx.spawn(&ctx.config(shell("exit 3")))?;
    assert_eq!(child.wait_for()?, 3);
    assert_eq!(child.exit_value()?, 3);
    Ok(())
}

#[test]
fn missing_executable_is_not_found() -> anyhow::Result<()> {
    for strategy in supported_strategies() {
        let result = procwarden_core::spawn(
            &SpawnConfig::new(SpawnCommand::line("no-such-program-procwarden"))
                .with_strategy(strategy),
        );
        assert!(
            matches!(result, Err(Error::Spawn(SpawnError::NotFound(_)))),
            "{strategy}"
        );

        let result = procwarden_core::spawn(
            &SpawnConfig::new(SpawnCommand::line("/nonexistent/procwarden/tool"))
                .with_strategy(strategy),
        );
        assert!(
            matches!(result, Err(Error::Spawn(SpawnError::NotFound(_)))),
            "{strategy}"
        );
    }

    let ctx = TestContext::new(SpawnStrategy::Dynamic);
    let child = ctx.spawn(&ctx.config(shell("no-such-program-procwarden")))?;
    assert_eq!(child.wait_for()?, results::COMMAND_NOT_FOUND);
    Ok(())
}

#[test]
fn non_executable_file_is_refused() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = dir.path().join("script.sh");
    std::fs::write(&script, "#!/bin/sh\necho hi\n")?;

    let result = procwarden_core::spawn(&SpawnConfig::new(SpawnCommand::argv([script
        .to_string_lossy()
        .into_owned()])));

    // No execute bit at all, so even root is refused.
    assert!(matches!(
        result,
        Err(Error::Spawn(SpawnError::PermissionDenied(_)))
    ));
    Ok(())
}

#[test]
fn command_line_ceiling_is_enforced_at_the_boundary() -> anyhow::Result<()> {
    let limit = SpawnLimits::DEFAULT_MAX_COMMAND_LINE;
    // "echo" + separator + argument
    let at_limit = "x".repeat(limit - 5);
    let over_limit = "x".repeat(limit - 4);

    let ctx = TestContext::new(SpawnStrategy::Dynamic);
    let child = ctx.spawn(&ctx.config(SpawnCommand::argv(["echo", at_limit.as_str()])))?;
    assert_eq!(child.stdout().read_to_end()?.len(), limit - 5 + 1);
    assert_eq!(child.wait_for()?, 0);

    let result = procwarden_core::spawn(&ctx.config(SpawnCommand::argv([
        "echo",
        over_limit.as_str(),
    ])));
    assert!(matches!(
        result,
        Err(Error::Spawn(SpawnError::ArgumentListTooLong { length, limit: l }))
            if length == limit + 1 && l == limit
    ));
    Ok(())
}

#[test]
fn environment_value_ceiling_is_enforced_at_the_boundary() -> anyhow::Result<()> {
    let limit = SpawnLimits::DEFAULT_MAX_ENVIRONMENT_VALUE;
    let ctx = TestContext::new(SpawnStrategy::Dynamic);

    let config = ctx
        .config(shell("printf %s \"$BIG\" | wc -c"))
        .with_env("BIG", "y".repeat(limit));
    let child = ctx.spawn(&config)?;
    assert_eq!(child.stdout().read_text()?.trim(), limit.to_string());
    assert_eq!(child.wait_for()?, 0);

    let config = ctx.config(shell("true")).with_env("BIG", "y".repeat(limit + 1));
    assert!(matches!(
        procwarden_core::spawn(&config),
        Err(Error::Spawn(SpawnError::EnvironmentValueTooLong { name, .. })) if name == "BIG"
    ));
    Ok(())
}

#[test]
fn environment_overrides_and_clearing() -> anyhow::Result<()> {
    let ctx = TestContext::new(SpawnStrategy::Dynamic);

    let config = ctx
        .config(shell("echo \"$PROCWARDEN_TEST_VALUE\""))
        .with_env("PROCWARDEN_TEST_VALUE", "from config");
    let child = ctx.spawn(&config)?;
    assert_eq!(child.stdout().read_text()?, "from config\n");
    child.wait_for()?;

    let config = ctx
        .config(SpawnCommand::argv(["/usr/bin/env"]))
        .with_clear_environment(true)
        .with_env("ONLY", "1");
    let child = ctx.spawn(&config)?;
    assert_eq!(child.stdout().read_text()?, "ONLY=1\n");
    assert_eq!(child.wait_for()?, 0);
    Ok(())
}

fn spawn_pwd(ctx: &TestContext, dir: &Path, allow_chdir: bool) -> anyhow::Result<String> {
    let config = ctx
        .config(shell("pwd -P"))
        .with_working_directory(dir)
        .with_allow_chdir_on_spawn(allow_chdir);
    let child = ctx.spawn(&config)?;
    let output = child.stdout().read_text()?;
    child.wait_for()?;
    Ok(output.trim_end().to_owned())
}

#[test]
fn working_directory_is_applied() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let expected = dir.path().canonicalize()?;
    let parent_cwd = std::env::current_dir()?;

    for strategy in supported_strategies() {
        let ctx = TestContext::new(strategy);
        let allow_chdir = strategy == SpawnStrategy::PosixSpawn;
        let output = spawn_pwd(&ctx, dir.path(), allow_chdir)
            .with_context(|| format!("strategy {strategy}"))?;
        assert_eq!(Path::new(&output), expected, "{strategy}");
    }

    assert_eq!(std::env::current_dir()?, parent_cwd);
    Ok(())
}

#[test]
fn missing_working_directory_is_refused() {
    let config = SpawnConfig::new(SpawnCommand::line("true"))
        .with_working_directory("/nonexistent/procwarden/dir");
    assert!(matches!(
        procwarden_core::spawn(&config),
        Err(Error::Spawn(SpawnError::NotFound(_)))
    ));
}

#[test]
fn closed_stdio_starts_with_closed_streams() -> anyhow::Result<()> {
    let ctx = TestContext::new(SpawnStrategy::Dynamic);
    let config = ctx.config(shell("echo ignored; cat")).with_pipe_stdio(false);
    let child = ctx.spawn(&config)?;

    assert!(child.stdin().is_closed());
    assert!(child.stdout().is_closed());
    assert!(!child.stderr().ready());
    assert_eq!(child.wait_for()?, 0);
    Ok(())
}

#[test]
fn malformed_commands_are_refused() {
    for command in [
        SpawnCommand::line(""),
        SpawnCommand::line("echo 'unbalanced"),
        SpawnCommand::argv(["echo", "nul\0byte"]),
    ] {
        assert!(matches!(
            procwarden_core::spawn(&SpawnConfig::new(command)),
            Err(Error::Spawn(SpawnError::InvalidCommand(_)))
        ));
    }
}
