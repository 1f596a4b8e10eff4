use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};
use waft_migrate_core::Version;
use waft_migrate_runner::Postgres;

use crate::script::{HookKind, HookScript};

const SUPPORTS: &str = "X-Supports:";
const SUPPORTS_FROM: &str = "X-Supports-From:";
const MODULES: &str = "X-Modules:";

/// Answers whether application modules are installed in the target database.
pub trait ModuleProbe {
    fn modules_installed(&self, modules: &[String]) -> Result<bool>;
}

impl ModuleProbe for Postgres {
    fn modules_installed(&self, modules: &[String]) -> Result<bool> {
        Postgres::modules_installed(self, modules)
    }
}

/// Applicability declared in a script's leading comment block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    pub supports: Option<BTreeSet<Version>>,
    pub supports_from: Option<Version>,
    pub modules: Vec<String>,
}

pub fn read_directives(path: &Path, kind: HookKind) -> Result<Directives> {
    let file = File::open(path)
        .with_context(|| format!("failed to open hook script: {}", path.display()))?;
    let prefix = kind.comment_prefix();
    let mut directives = Directives::default();

    for line in BufReader::new(file).lines() {
        let line =
            line.with_context(|| format!("failed to read hook script: {}", path.display()))?;
        let stripped = line.trim();
        let Some(comment) = stripped.strip_prefix(prefix) else {
            break;
        };
        let comment = comment.trim();

        if let Some(rest) = comment.strip_prefix(SUPPORTS_FROM) {
            match Version::parse(rest) {
                Ok(version) => directives.supports_from = Some(version),
                Err(err) => warn!("{}: ignoring {SUPPORTS_FROM} {err}", path.display()),
            }
        } else if let Some(rest) = comment.strip_prefix(SUPPORTS) {
            let declared = rest
                .split_whitespace()
                .filter_map(|token| match Version::parse(token) {
                    Ok(version) => Some(version),
                    Err(err) => {
                        warn!("{}: ignoring {SUPPORTS} token: {err}", path.display());
                        None
                    }
                })
                .collect::<BTreeSet<_>>();
            directives.supports = Some(match directives.supports.take() {
                Some(existing) => existing.intersection(&declared).copied().collect(),
                None => declared,
            });
        } else if let Some(rest) = comment.strip_prefix(MODULES) {
            directives
                .modules
                .extend(rest.split_whitespace().map(str::to_string));
        }
    }

    Ok(directives)
}

/// Whether `script` applies when run at `run_at`.
///
/// The module check queries the live database, so it only runs once the
/// version directives have passed.
pub fn is_supported(
    script: &HookScript,
    run_at: Version,
    probe: &impl ModuleProbe,
) -> Result<bool> {
    let Some(kind) = script.kind() else {
        return Ok(true);
    };
    let directives = read_directives(script.path(), kind)?;

    if let Some(supports) = &directives.supports {
        if !supports.contains(&run_at) {
            debug!("{} does not support {run_at}", script.file_name());
            return Ok(false);
        }
    }
    if let Some(from) = directives.supports_from {
        if run_at < from {
            debug!("{} only supports {from} and later", script.file_name());
            return Ok(false);
        }
    }
    if !directives.modules.is_empty() && !probe.modules_installed(&directives.modules)? {
        debug!(
            "{} skipped, modules not installed: {}",
            script.file_name(),
            directives.modules.join(" ")
        );
        return Ok(false);
    }

    Ok(true)
}
