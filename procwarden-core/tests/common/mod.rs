//! Shared helpers for process lifecycle tests.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use procwarden_core::{ProcessHandle, SpawnCommand, SpawnConfig, SpawnStrategy};

/// Upper bound for anything that should happen "promptly".
pub const PROMPT: Duration = Duration::from_secs(3);

/// Per-test bookkeeping: the strategy under test and when the test started.
pub struct TestContext {
    pub strategy: SpawnStrategy,
    started: Instant,
}

impl TestContext {
    pub fn new(strategy: SpawnStrategy) -> Self {
        Self {
            strategy,
            started: Instant::now(),
        }
    }

    /// A configuration for `command` using this context's strategy.
    pub fn config(&self, command: SpawnCommand) -> SpawnConfig {
        SpawnConfig::new(command).with_strategy(self.strategy)
    }

    pub fn spawn(&self, config: &SpawnConfig) -> anyhow::Result<ProcessHandle> {
        procwarden_core::spawn(config)
            .map_err(|e| anyhow::anyhow!("spawn with {} failed: {e}", self.strategy))
    }

    /// Time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Restarts the clock.
    pub fn restart_clock(&mut self) {
        self.started = Instant::now();
    }
}

/// `Dynamic` followed by every concrete strategy this platform supports.
pub fn supported_strategies() -> Vec<SpawnStrategy> {
    std::iter::once(SpawnStrategy::Dynamic)
        .chain(procwarden_core::capabilities().strategies)
        .collect()
}

/// Runs `script` with `sh -c`.
pub fn shell(script: &str) -> SpawnCommand {
    SpawnCommand::argv(["sh", "-c", script])
}
