//! Launch strategies and per-platform capability queries.

use serde::{Deserialize, Serialize};

use crate::error::{PlatformLimitation, SpawnError};
use crate::sys;

/// OS mechanism used to create a child process.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    Deserialize,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SpawnStrategy {
    /// Pick the most capable strategy available for the requested options.
    #[default]
    Dynamic,
    /// `fork()` followed by `execve()` in the child.
    ForkExec,
    /// `vfork()` followed by `execve()` in the child.
    VforkExec,
    /// `posix_spawn()`.
    PosixSpawn,
}

impl SpawnStrategy {
    /// Returns whether this strategy can be used on the current platform. `Dynamic` is
    /// supported whenever any concrete strategy is.
    pub fn is_supported(self) -> bool {
        self.check_supported().is_ok()
    }

    /// Like [`Self::is_supported`], but reports the missing capability.
    pub fn check_supported(self) -> Result<(), PlatformLimitation> {
        let available = match self {
            Self::Dynamic => LaunchMethod::PREFERENCE
                .iter()
                .any(|method| sys::process::supports(*method)),
            concrete => LaunchMethod::from_strategy(concrete)
                .is_some_and(sys::process::supports),
        };

        if available {
            Ok(())
        } else {
            Err(PlatformLimitation::StrategyUnavailable(self))
        }
    }
}

/// A concrete launch primitive; the resolved form of a [`SpawnStrategy`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum LaunchMethod {
    ForkExec,
    VforkExec,
    PosixSpawn,
}

impl LaunchMethod {
    /// Order in which `Dynamic` tries methods.
    pub(crate) const PREFERENCE: [Self; 3] = [Self::PosixSpawn, Self::VforkExec, Self::ForkExec];

    const fn from_strategy(strategy: SpawnStrategy) -> Option<Self> {
        match strategy {
            SpawnStrategy::Dynamic => None,
            SpawnStrategy::ForkExec => Some(Self::ForkExec),
            SpawnStrategy::VforkExec => Some(Self::VforkExec),
            SpawnStrategy::PosixSpawn => Some(Self::PosixSpawn),
        }
    }

    /// The strategy name reported on handles launched with this method.
    pub(crate) const fn as_strategy(self) -> SpawnStrategy {
        match self {
            Self::ForkExec => SpawnStrategy::ForkExec,
            Self::VforkExec => SpawnStrategy::VforkExec,
            Self::PosixSpawn => SpawnStrategy::PosixSpawn,
        }
    }

    /// Whether the child's working directory can be set without touching the parent's.
    const fn chdirs_in_child(self) -> bool {
        !matches!(self, Self::PosixSpawn)
    }
}

/// Resolves a requested strategy into the method used to launch.
///
/// `posix_spawn` cannot change directory in the child, so honoring a working directory with
/// it means temporarily changing the parent's; that is only done when `allow_chdir_on_spawn`
/// is set. `Dynamic` skips `posix_spawn` in that case instead of failing.
///
/// # Arguments
///
/// * `requested` - The strategy from the configuration.
/// * `needs_chdir` - Whether a working directory override is configured.
/// * `allow_chdir_on_spawn` - Whether the parent may change directory around the launch.
pub(crate) fn resolve(
    requested: SpawnStrategy,
    needs_chdir: bool,
    allow_chdir_on_spawn: bool,
) -> Result<LaunchMethod, SpawnError> {
    let chdir_ok =
        |method: LaunchMethod| !needs_chdir || allow_chdir_on_spawn || method.chdirs_in_child();

    match LaunchMethod::from_strategy(requested) {
        Some(method) => {
            if !sys::process::supports(method) {
                return Err(SpawnError::UnsupportedStrategy {
                    strategy: requested,
                    reason: "not available on this platform",
                });
            }
            if !chdir_ok(method) {
                return Err(SpawnError::UnsupportedStrategy {
                    strategy: requested,
                    reason: "changing the working directory requires allow_chdir_on_spawn",
                });
            }
            Ok(method)
        }
        None => LaunchMethod::PREFERENCE
            .into_iter()
            .find(|method| sys::process::supports(*method) && chdir_ok(*method))
            .ok_or(SpawnError::UnsupportedStrategy {
                strategy: requested,
                reason: "no launch primitive available on this platform",
            }),
    }
}

/// What the current platform can do.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlatformCapabilities {
    /// Concrete strategies usable here, most preferred first.
    pub strategies: Vec<SpawnStrategy>,
    /// Whether signals can be delivered to a whole process group.
    pub group_signals: Result<(), PlatformLimitation>,
}

/// Queries the capabilities of the current platform.
pub fn capabilities() -> PlatformCapabilities {
    PlatformCapabilities {
        strategies: LaunchMethod::PREFERENCE
            .into_iter()
            .filter(|method| sys::process::supports(*method))
            .map(LaunchMethod::as_strategy)
            .collect(),
        group_signals: sys::signal::check_group_signals(),
    }
}
