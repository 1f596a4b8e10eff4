use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use thiserror::Error;
use waft_migrate_core::{Stage, Version, WaftLayout};

use crate::script::{HookKind, HookScript};

/// A redirect alias points at a script neither common hook root contains.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("script \"{0}\" not found")]
pub struct ScriptNotFound(pub String);

#[derive(Debug, Clone)]
pub struct HookResolver {
    layout: WaftLayout,
}

impl HookResolver {
    pub fn new(layout: WaftLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &WaftLayout {
        &self.layout
    }

    /// All hook files for `stage` at `version`, ordered by file name.
    ///
    /// The same file name in several roots yields several scripts; the sort is
    /// stable, so those keep the root scan order.
    pub fn resolve(&self, version: Version, stage: Stage) -> Result<Vec<HookScript>> {
        let mut scripts = Vec::new();
        for dir in self.layout.hook_dirs(version, stage) {
            if !dir.is_dir() {
                continue;
            }

            for entry in fs::read_dir(&dir)
                .with_context(|| format!("failed to read hook directory: {}", dir.display()))?
            {
                let entry = entry
                    .with_context(|| format!("failed to read hook directory: {}", dir.display()))?;
                let path = entry.path();
                let is_file = fs::metadata(&path)
                    .map(|metadata| metadata.is_file())
                    .unwrap_or(false);
                if is_file {
                    scripts.push(HookScript::new(path));
                }
            }
        }

        scripts.sort_by(|left, right| left.file_name().cmp(right.file_name()));
        Ok(scripts)
    }

    /// Follows a redirect alias one hop, project-local common hooks first.
    pub fn resolve_alias(&self, alias: &HookScript) -> Result<HookScript> {
        let content = fs::read_to_string(alias.path())
            .with_context(|| format!("failed to read redirect alias: {}", alias.path().display()))?;
        let subpath = content.lines().next().unwrap_or_default().trim();
        if subpath.is_empty() {
            anyhow::bail!("redirect alias {} is empty", alias.path().display());
        }

        let candidates: Vec<PathBuf> = self
            .layout
            .common_hook_dirs()
            .into_iter()
            .map(|root| root.join(subpath))
            .collect();
        let Some(target) = candidates.into_iter().find(|candidate| candidate.exists()) else {
            return Err(ScriptNotFound(subpath.to_string()).into());
        };

        let target = HookScript::new(target);
        if target.kind() == Some(HookKind::RedirectAlias) {
            anyhow::bail!(
                "redirect alias {} points at another alias: {}",
                alias.path().display(),
                target.path().display()
            );
        }
        Ok(target)
    }
}
