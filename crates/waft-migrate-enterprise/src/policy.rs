use std::time::Duration;

use thiserror::Error;
use waft_migrate_core::Version;

use crate::process::ProcessExit;

/// Marker the upgrade tool leaves on stderr when its HTTP calls time out.
pub const TIMEOUT_MARKER: &str = "<urlopen error timed out>";

/// Bounds on how often, and how eagerly, the enterprise tool is re-launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Sleep between log polls while no new line is available.
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptVerdict {
    Succeeded,
    Retry,
    Fail { exit_code: i32 },
}

/// Decides how a finished attempt ended.
///
/// Neither the exit code nor the log identifies a completed upgrade reliably,
/// so a reachable `-enterprise` database is the only success signal.
pub fn classify_exit(exit: &ProcessExit, database_ready: bool) -> AttemptVerdict {
    if database_ready {
        return AttemptVerdict::Succeeded;
    }
    let timed_out = exit
        .stderr_tail
        .as_deref()
        .is_some_and(|tail| tail.contains(TIMEOUT_MARKER));
    if exit.code == 1 && timed_out {
        AttemptVerdict::Retry
    } else {
        AttemptVerdict::Fail {
            exit_code: exit.code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnterpriseUpgradeError {
    #[error("enterprise upgrade to {version} failed, too many attempts ({attempts})")]
    AttemptsExhausted { version: Version, attempts: u32 },
    #[error(
        "enterprise upgrade to {version} failed with exit code {exit_code}: database {database} is not available"
    )]
    Failed {
        version: Version,
        exit_code: i32,
        database: String,
    },
}
