use std::fmt;

use anyhow::anyhow;

/// A named point in the migration timeline where hook scripts run.
///
/// The string form doubles as the hook directory name and as the key under
/// `hooks` in `progress.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    PreMigration,
    EnterprisePreMigration,
    PreUpgrade,
    EnterprisePreUpgrade,
    EnterprisePreJump,
    EnterprisePostJump,
    EnterprisePostUpgrade,
    PreOpenupgrade,
    PostUpgrade,
    EnterprisePostMigration,
    PostMigration,
}

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::PreMigration,
        Stage::EnterprisePreMigration,
        Stage::PreUpgrade,
        Stage::EnterprisePreUpgrade,
        Stage::EnterprisePreJump,
        Stage::EnterprisePostJump,
        Stage::EnterprisePostUpgrade,
        Stage::PreOpenupgrade,
        Stage::PostUpgrade,
        Stage::EnterprisePostMigration,
        Stage::PostMigration,
    ];

    /// Order used when rewinding progress for a single version.
    pub const RESET_ORDER: [Stage; 7] = [
        Stage::PreMigration,
        Stage::PreUpgrade,
        Stage::EnterprisePreUpgrade,
        Stage::EnterprisePostUpgrade,
        Stage::PreOpenupgrade,
        Stage::PostUpgrade,
        Stage::PostMigration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreMigration => "pre-migration",
            Self::EnterprisePreMigration => "enterprise/pre-migration",
            Self::PreUpgrade => "pre-upgrade",
            Self::EnterprisePreUpgrade => "enterprise/pre-upgrade",
            Self::EnterprisePreJump => "enterprise/pre-jump",
            Self::EnterprisePostJump => "enterprise/post-jump",
            Self::EnterprisePostUpgrade => "enterprise/post-upgrade",
            Self::PreOpenupgrade => "pre-openupgrade",
            Self::PostUpgrade => "post-upgrade",
            Self::EnterprisePostMigration => "enterprise/post-migration",
            Self::PostMigration => "post-migration",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == value.trim())
            .ok_or_else(|| anyhow!("unknown migration stage: '{}'", value.trim()))
    }

    /// Slot of this stage in [`Stage::RESET_ORDER`].
    ///
    /// Stages outside the canonical order share the slot of the canonical
    /// stage they run alongside: the enterprise pre-migration with
    /// `pre-migration`, the jump stages with the enterprise upgrade stages and
    /// the enterprise post-migration with `post-migration`.
    pub fn reset_slot(self) -> usize {
        let canonical = match self {
            Self::EnterprisePreMigration => Self::PreMigration,
            Self::EnterprisePreJump => Self::EnterprisePreUpgrade,
            Self::EnterprisePostJump => Self::EnterprisePostUpgrade,
            Self::EnterprisePostMigration => Self::PostMigration,
            other => other,
        };
        Self::RESET_ORDER
            .iter()
            .position(|stage| *stage == canonical)
            .unwrap_or(Self::RESET_ORDER.len() - 1)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
