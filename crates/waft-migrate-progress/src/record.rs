use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use waft_migrate_core::{Stage, Version};

pub type ProgressRecords = BTreeMap<Version, ProgressRecord>;

/// Checkpoint data for one release.
///
/// `hooks` is keyed by the stage's directory name and lists the script
/// identifiers that completed, in execution order. Unknown stage keys are kept
/// as-is so older progress files stay readable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(default)]
    pub hooks: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub upgrade: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub enterprise: bool,
}

impl ProgressRecord {
    pub fn has_script(&self, stage: Stage, script: &str) -> bool {
        self.hooks
            .get(stage.as_str())
            .is_some_and(|scripts| scripts.iter().any(|existing| existing == script))
    }

    pub fn is_completed(&self) -> bool {
        self.upgrade || self.enterprise
    }

    pub(crate) fn insert_script(&mut self, stage: Stage, script: &str) -> bool {
        let scripts = self.hooks.entry(stage.as_str().to_string()).or_default();
        if scripts.iter().any(|existing| existing == script) {
            return false;
        }
        scripts.push(script.to_string());
        true
    }

    pub(crate) fn rewind_to(&mut self, cutoff: Stage) {
        let slot = cutoff.reset_slot();
        for stage in Stage::ALL {
            if stage.reset_slot() >= slot {
                self.hooks.remove(stage.as_str());
            }
        }

        // The enterprise jump lands between the enterprise pre- and
        // post-upgrade stages, the open-source upgrade between
        // pre-openupgrade and post-upgrade.
        if slot <= Stage::EnterprisePreUpgrade.reset_slot() {
            self.enterprise = false;
        }
        if slot <= Stage::PreOpenupgrade.reset_slot() {
            self.upgrade = false;
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

pub fn parse_progress(content: &str) -> Result<ProgressRecords> {
    if content.trim().is_empty() {
        anyhow::bail!("progress document is empty");
    }
    serde_json::from_str::<ProgressRecords>(content).context("failed parsing progress document")
}
