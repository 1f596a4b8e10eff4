use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use waft_migrate_core::{Stage, Version};

use crate::orchestrator::MigrationPlan;
use crate::Cli;

pub const DEFAULT_ENTERPRISE_MINIMUM_TARGET: Version = Version::major_release(15);

pub type EnvSnapshot = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is required")]
    MissingVariable(&'static str),
    #[error(
        "no start version specified; use either --start-version on the command line, or MIGRATION_START_VERSION in the environment"
    )]
    MissingStartVersion,
    #[error("start version {start} is past the target version {target}")]
    StartAfterTarget { start: Version, target: Version },
}

/// `--reset-progress VERSION[:STAGE]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetRequest {
    pub version: Version,
    pub stage: Stage,
}

/// Everything one run needs, resolved from the command line and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationParams {
    pub root: PathBuf,
    pub database: String,
    pub pg_password: Option<String>,
    pub start_version: Version,
    pub target_version: Version,
    pub log_level: String,
    pub enterprise_enabled: bool,
    pub enterprise_jump_to: Version,
    pub enterprise_dont_resume: bool,
    pub enterprise_autotrust_ssh: bool,
    pub open_upgrade_disabled: bool,
    pub production: bool,
    pub verbose: bool,
    pub rebuild: bool,
    pub no_backups: bool,
    pub skip_initial_upgrade: bool,
    pub reset: Option<ResetRequest>,
}

impl MigrationParams {
    pub fn plan(&self) -> MigrationPlan {
        MigrationPlan {
            start_version: self.start_version,
            target_version: self.target_version,
            enterprise_enabled: self.enterprise_enabled,
            enterprise_minimum_target: self.enterprise_jump_to,
            open_upgrade_disabled: self.open_upgrade_disabled,
            skip_initial_upgrade: self.skip_initial_upgrade,
        }
    }
}

pub fn env_snapshot() -> EnvSnapshot {
    std::env::vars().collect()
}

pub fn resolve_params(cli: &Cli, env: &EnvSnapshot, cwd: &Path) -> Result<MigrationParams> {
    let database = match cli.database.as_deref().filter(|value| !value.is_empty()) {
        Some(database) => database.to_string(),
        None => required(env, "PGDATABASE")?.to_string(),
    };
    let target_version = Version::parse(required(env, "ODOO_VERSION")?)
        .context("ODOO_VERSION is not a valid version")?;
    let log_level = required(env, "WAFT_LOG_LEVEL")?.to_string();

    let start_version = match cli
        .start_version
        .as_deref()
        .or_else(|| non_empty(env, "MIGRATION_START_VERSION"))
    {
        Some(raw) => Version::parse(raw).context("invalid start version")?,
        None => return Err(ConfigError::MissingStartVersion.into()),
    };
    if start_version > target_version {
        return Err(ConfigError::StartAfterTarget {
            start: start_version,
            target: target_version,
        }
        .into());
    }

    let enterprise_jump_to = match cli
        .enterprise_jump_to
        .as_deref()
        .or_else(|| non_empty(env, "MIGRATION_ENTERPRISE_JUMP_TO"))
    {
        Some(raw) => Version::parse(raw).context("invalid enterprise jump target")?,
        None => DEFAULT_ENTERPRISE_MINIMUM_TARGET,
    };

    let reset = cli.reset_progress.as_deref().map(parse_reset).transpose()?;
    let root = non_empty(env, "WAFT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| cwd.to_path_buf());

    Ok(MigrationParams {
        root,
        database,
        pg_password: non_empty(env, "PGPASSWORD").map(str::to_string),
        start_version,
        target_version,
        log_level,
        enterprise_enabled: cli.enterprise_enabled
            || env_flag(env, "MIGRATION_ENTERPRISE_ENABLED"),
        enterprise_jump_to,
        enterprise_dont_resume: cli.enterprise_dont_resume,
        enterprise_autotrust_ssh: cli.enterprise_autotrust_ssh,
        open_upgrade_disabled: cli.open_upgrade_disabled
            || env_flag(env, "MIGRATION_OPEN_UPGRADE_DISABLED"),
        production: cli.production,
        verbose: cli.verbose,
        rebuild: cli.rebuild,
        no_backups: env_flag(env, "MIGRATION_NO_BACKUPS"),
        skip_initial_upgrade: env_flag(env, "SKIP_INITIAL_UPGRADE"),
        reset,
    })
}

/// Resolves symlinks in the working root. Hook scripts are recorded by
/// their full path, so the same tree must always produce the same paths.
pub fn canonical_root(root: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(root)
        .with_context(|| format!("failed to resolve working directory {}", root.display()))
}

/// Parses `VERSION[:STAGE]`; the stage defaults to `post-upgrade`.
pub fn parse_reset(raw: &str) -> Result<ResetRequest> {
    let (version, stage) = match raw.split_once(':') {
        Some((version, stage)) => (version, Some(stage)),
        None => (raw, None),
    };
    let version = Version::parse(version)
        .with_context(|| format!("invalid --reset-progress version: {raw}"))?;
    let stage = match stage {
        Some(stage) => {
            Stage::parse(stage).with_context(|| format!("invalid --reset-progress stage: {raw}"))?
        }
        None => Stage::PostUpgrade,
    };
    Ok(ResetRequest { version, stage })
}

pub fn env_flag(env: &EnvSnapshot, name: &str) -> bool {
    env.get(name).is_some_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "yes" | "true"
        )
    })
}

fn non_empty<'a>(env: &'a EnvSnapshot, name: &str) -> Option<&'a str> {
    env.get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn required<'a>(env: &'a EnvSnapshot, name: &'static str) -> Result<&'a str> {
    non_empty(env, name).ok_or_else(|| ConfigError::MissingVariable(name).into())
}
