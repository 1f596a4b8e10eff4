use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};
use waft_migrate_core::{Stage, Version};

use crate::record::{parse_progress, ProgressRecord, ProgressRecords};

/// Durable record of what the migration already did.
///
/// Every mutating call persists the whole document before returning, so a
/// crash never loses more than the action that was in flight.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
    records: ProgressRecords,
}

impl ProgressStore {
    /// Loads the document at `path`. A missing file is a fresh migration; an
    /// unreadable or malformed one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = load_records(&path)?;
        debug!(path = %path.display(), versions = records.len(), "loaded progress");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &ProgressRecords {
        &self.records
    }

    pub fn record(&self, version: Version) -> Option<&ProgressRecord> {
        self.records.get(&version)
    }

    pub fn is_upgrade_done(&self, version: Version) -> bool {
        self.record(version).is_some_and(|record| record.upgrade)
    }

    pub fn is_enterprise_done(&self, version: Version) -> bool {
        self.record(version).is_some_and(|record| record.enterprise)
    }

    pub fn has_script(&self, version: Version, stage: Stage, script: &str) -> bool {
        self.record(version)
            .is_some_and(|record| record.has_script(stage, script))
    }

    /// Highest release whose upgrade or enterprise upgrade completed, but never
    /// lower than `floor`.
    pub fn highest_completed_version(&self, floor: Version) -> Version {
        self.records
            .iter()
            .filter(|(version, record)| **version > floor && record.is_completed())
            .map(|(version, _)| *version)
            .max()
            .unwrap_or(floor)
    }

    /// Returns `false` when the script was already recorded.
    pub fn mark_script_executed(
        &mut self,
        version: Version,
        stage: Stage,
        script: &str,
    ) -> Result<bool> {
        let inserted = self
            .records
            .entry(version)
            .or_default()
            .insert_script(stage, script);
        if !inserted {
            return Ok(false);
        }

        info!("Marking {version} {stage} script {script} as executed");
        self.save()?;
        Ok(true)
    }

    pub fn mark_upgrade_done(&mut self, version: Version) -> Result<()> {
        info!("Marking upgrade to {version} as done");
        self.records.entry(version).or_default().upgrade = true;
        self.save()
    }

    pub fn mark_enterprise_done(&mut self, version: Version) -> Result<()> {
        info!("Marking enterprise upgrade to {version} as done");
        self.records.entry(version).or_default().enterprise = true;
        self.save()
    }

    /// Forgets `version`'s progress from `cutoff` onwards, and everything
    /// recorded for later releases.
    pub fn reset(&mut self, version: Version, cutoff: Stage) -> Result<()> {
        info!("Resetting progress of {version} from {cutoff} onwards");
        if let Some(record) = self.records.get_mut(&version) {
            record.rewind_to(cutoff);
        }

        let later = self
            .records
            .keys()
            .filter(|existing| **existing > version)
            .copied()
            .collect::<Vec<_>>();
        for existing in later {
            info!("Dropping progress of {existing}");
            self.records.remove(&existing);
        }

        self.save()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let mut content = serde_json::to_string_pretty(&self.records).with_context(|| {
            format!("failed serializing progress: {}", self.path.display())
        })?;
        content.push('\n');

        let part_path = part_path(&self.path);
        fs::write(&part_path, content)
            .with_context(|| format!("failed writing progress: {}", part_path.display()))?;
        fs::rename(&part_path, &self.path).with_context(|| {
            format!(
                "failed to move progress into place: {}",
                self.path.display()
            )
        })
    }
}

fn load_records(path: &Path) -> Result<ProgressRecords> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ProgressRecords::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed reading progress: {}", path.display()));
        }
    };

    parse_progress(&content)
        .with_context(|| format!("refusing to guess migration state: {}", path.display()))
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}
