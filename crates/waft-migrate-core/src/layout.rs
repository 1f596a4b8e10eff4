use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Stage, Version};

/// Paths of a Waft working root and the migration tree underneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaftLayout {
    root: PathBuf,
}

impl WaftLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn migration_dir(&self) -> PathBuf {
        self.root.join("migration")
    }

    pub fn toolkit_dir(&self) -> PathBuf {
        self.root.join("waftlib").join("migration")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("waftlib").join("templates")
    }

    pub fn logfile_dir(&self) -> PathBuf {
        self.root.join("logfile")
    }

    pub fn migration_log_path(&self) -> PathBuf {
        self.logfile_dir().join("migration.log")
    }

    pub fn progress_path(&self) -> PathBuf {
        self.root.join("progress.json")
    }

    pub fn ssh_known_hosts_path(&self) -> PathBuf {
        self.migration_dir().join(".ssh-known-hosts")
    }

    pub fn migration_api_dir(&self) -> PathBuf {
        self.toolkit_dir().join("api")
    }

    /// Build directory used to run code at `version`.
    ///
    /// The final release lives in the working root itself once the tree is on
    /// a modern (14.0+) layout; every other release gets its own build.
    pub fn build_dir(&self, version: Version, final_version: Version) -> PathBuf {
        if version == final_version && version >= Version::major_release(14) {
            self.root.clone()
        } else {
            self.migration_dir().join(format!("build-{version}"))
        }
    }

    pub fn toolkit_build_dir(&self, version: Version) -> PathBuf {
        self.toolkit_dir().join(format!("build-{version}"))
    }

    pub fn upgrade_log_path(&self, database: &str, version: Version) -> PathBuf {
        self.logfile_dir().join(format!("{database}-{version}.log"))
    }

    pub fn enterprise_log_path(&self, database: &str, version: Version) -> PathBuf {
        self.logfile_dir()
            .join(format!("{database}-{version}-enterprise.log"))
    }

    /// Hook roots for `stage` in scan order: toolkit-shipped and project-local
    /// version-agnostic roots, then toolkit-shipped and project-local roots for
    /// `version`.
    pub fn hook_dirs(&self, version: Version, stage: Stage) -> [PathBuf; 4] {
        [
            self.toolkit_dir().join("hook").join(stage.as_str()),
            self.migration_dir().join("hook").join(stage.as_str()),
            self.toolkit_build_dir(version)
                .join("hook")
                .join(stage.as_str()),
            self.migration_dir()
                .join(format!("build-{version}"))
                .join("hook")
                .join(stage.as_str()),
        ]
    }

    /// Roots searched when following a redirect alias, project-local first.
    pub fn common_hook_dirs(&self) -> [PathBuf; 2] {
        [
            self.migration_dir().join("hook").join("common"),
            self.toolkit_dir().join("hook").join("common"),
        ]
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.logfile_dir(), self.migration_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let log_path = self.migration_log_path();
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to create {}", log_path.display()))?;
        Ok(())
    }
}

pub fn default_filestore_root() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set; cannot resolve filestore root")?;
    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("Odoo")
        .join("filestore"))
}
