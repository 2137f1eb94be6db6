//! Trace utilities

/// Trace category for process launches.
pub const SPAWN: &str = "spawn";
/// Trace category for termination detection and reaping.
pub const MONITOR: &str = "monitor";
/// Trace category for stop/kill delivery.
pub const SIGNALS: &str = "signals";
/// Trace category for child stdio streams.
pub const PIPES: &str = "pipes";
