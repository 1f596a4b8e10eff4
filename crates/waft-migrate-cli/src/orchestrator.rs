use anyhow::Result;
use tracing::{debug, info};
use waft_migrate_core::{build_versions, enterprise_build_versions, Stage, Version};
use waft_migrate_progress::ProgressStore;

/// Side effects the ladder walk drives. Each action persists its own progress
/// before returning.
pub trait MigrationActions {
    fn progress(&self) -> &ProgressStore;

    /// Backs up mail server settings and defuses outgoing mail and crons.
    fn prepare_database(&mut self) -> Result<()>;

    fn run_stage(&mut self, version: Version, stage: Stage, run_at: Version) -> Result<()>;

    /// Open-source upgrade of the database to `version`.
    fn run_upgrade(&mut self, version: Version) -> Result<()>;

    /// Enterprise upgrade to `version`, folded back into the primary database.
    fn run_enterprise_upgrade(&mut self, version: Version) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationPlan {
    pub start_version: Version,
    pub target_version: Version,
    pub enterprise_enabled: bool,
    pub enterprise_minimum_target: Version,
    pub open_upgrade_disabled: bool,
    pub skip_initial_upgrade: bool,
}

/// State of one migration run.
///
/// `db_version` is the release the live database is on; only the walk moves
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSession {
    plan: MigrationPlan,
    db_version: Version,
    progress_version: Version,
    will_jump: bool,
    from_start: bool,
}

impl MigrationSession {
    pub fn new(plan: MigrationPlan, progress: &ProgressStore) -> Self {
        let minimum = plan.enterprise_minimum_target;
        let will_jump = plan.enterprise_enabled && plan.start_version.next_major() < minimum;
        let progress_version = progress.highest_completed_version(plan.start_version);
        let from_start = progress_version == plan.start_version
            && !progress.is_upgrade_done(minimum)
            && !progress.is_enterprise_done(minimum);

        Self {
            plan,
            db_version: plan.start_version,
            progress_version,
            will_jump,
            from_start,
        }
    }

    pub fn plan(&self) -> &MigrationPlan {
        &self.plan
    }

    pub fn db_version(&self) -> Version {
        self.db_version
    }

    pub fn progress_version(&self) -> Version {
        self.progress_version
    }

    pub fn will_jump(&self) -> bool {
        self.will_jump
    }

    pub fn from_start(&self) -> bool {
        self.from_start
    }

    /// Releases the walk visits, in ascending order.
    pub fn ladder(&self) -> Vec<Version> {
        build_versions(self.plan.start_version, self.plan.target_version)
    }

    fn enterprise_ladder(&self) -> Vec<Version> {
        enterprise_build_versions(
            self.plan.start_version,
            self.plan.target_version,
            self.plan.enterprise_minimum_target,
        )
    }

    fn move_to(&mut self, version: Version) {
        if self.db_version != version {
            debug!("database is now at {version}");
        }
        self.db_version = version;
    }
}

/// Walks the database from the start release to the target release.
///
/// Every action persists its progress before control comes back here, so an
/// aborted run is resumed by calling this again with a fresh session.
pub fn run_migration<A: MigrationActions>(
    session: &mut MigrationSession,
    actions: &mut A,
) -> Result<()> {
    let plan = *session.plan();
    let start = plan.start_version;
    let minimum = plan.enterprise_minimum_target;

    info!("Backing up mail server and defusing database...");
    actions.prepare_database()?;

    if session.from_start() {
        run_initial_stages(session, actions)?;
    } else {
        session.move_to(session.progress_version());
    }

    if plan.enterprise_enabled {
        if session.from_start() && !actions.progress().is_enterprise_done(start) {
            if session.will_jump() {
                jump_to_minimum_target(session, actions)?;
            }
        } else if session.progress_version() == minimum {
            session.move_to(minimum);
            if session.will_jump() {
                actions.run_stage(minimum, Stage::EnterprisePostJump, minimum)?;
            }
            actions.run_stage(minimum, Stage::EnterprisePostUpgrade, minimum)?;
            actions.run_stage(minimum, Stage::PostUpgrade, minimum)?;
        }
    }

    let enterprise_ladder = session.enterprise_ladder();
    let mut last_version = start;
    for version in session.ladder() {
        let outside_enterprise_ladder =
            plan.enterprise_enabled && !enterprise_ladder.contains(&version);
        if version == start
            || session.db_version().is_major_ahead_of(version)
            || outside_enterprise_ladder
        {
            last_version = version;
            continue;
        }
        step_to(session, actions, version, last_version)?;
        last_version = version;
    }

    let db_version = session.db_version();
    if plan.enterprise_enabled {
        actions.run_stage(db_version, Stage::EnterprisePostMigration, db_version)?;
    }
    actions.run_stage(db_version, Stage::PostMigration, db_version)?;
    Ok(())
}

fn run_initial_stages<A: MigrationActions>(
    session: &mut MigrationSession,
    actions: &mut A,
) -> Result<()> {
    let plan = *session.plan();
    let start = plan.start_version;

    if !actions.progress().is_upgrade_done(start) {
        actions.run_stage(start, Stage::PreMigration, start)?;
    }
    if plan.enterprise_enabled && !actions.progress().is_enterprise_done(start) {
        actions.run_stage(start, Stage::EnterprisePreMigration, start)?;
    }

    if !plan.skip_initial_upgrade && !actions.progress().is_upgrade_done(start) {
        info!("Running initial upgrade...");
        actions.run_upgrade(start)?;
    }
    Ok(())
}

// The enterprise service takes the database straight from the start release
// to the minimum target, skipping the releases in between.
fn jump_to_minimum_target<A: MigrationActions>(
    session: &mut MigrationSession,
    actions: &mut A,
) -> Result<()> {
    let start = session.plan().start_version;
    let minimum = session.plan().enterprise_minimum_target;
    let enterprise_done = actions.progress().is_enterprise_done(minimum);
    let openupgrade_done = actions.progress().is_upgrade_done(minimum);

    if !enterprise_done {
        info!("Jumping from {start} to {minimum} with the enterprise upgrade...");
        actions.run_stage(minimum, Stage::EnterprisePreJump, start)?;
        actions.run_enterprise_upgrade(minimum)?;
    }
    session.move_to(minimum);
    if !openupgrade_done {
        actions.run_stage(minimum, Stage::EnterprisePostJump, minimum)?;
        actions.run_stage(minimum, Stage::EnterprisePostUpgrade, minimum)?;
        actions.run_stage(minimum, Stage::PostUpgrade, minimum)?;
    }
    Ok(())
}

fn step_to<A: MigrationActions>(
    session: &mut MigrationSession,
    actions: &mut A,
    version: Version,
    last_version: Version,
) -> Result<()> {
    let plan = *session.plan();
    let enterprise_done = actions.progress().is_enterprise_done(version);
    let openupgrade_done = actions.progress().is_upgrade_done(version);
    if enterprise_done || openupgrade_done {
        session.move_to(version);
    }

    let enterprise_pending = plan.enterprise_enabled
        && !enterprise_done
        && version > plan.enterprise_minimum_target;
    let openupgrade_pending = !plan.open_upgrade_disabled && !openupgrade_done;

    if openupgrade_pending || enterprise_pending {
        actions.run_stage(version, Stage::PreUpgrade, last_version)?;
    }

    if plan.enterprise_enabled {
        if enterprise_pending {
            actions.run_stage(version, Stage::EnterprisePreUpgrade, last_version)?;
            actions.run_enterprise_upgrade(version)?;
            session.move_to(version);
        }
        if !openupgrade_done {
            actions.run_stage(version, Stage::EnterprisePostUpgrade, version)?;
        }
    }

    if openupgrade_pending {
        actions.run_stage(version, Stage::PreOpenupgrade, version)?;
        info!("Running OpenUpgrade to {version}...");
        actions.run_upgrade(version)?;
    }

    session.move_to(version);
    actions.run_stage(version, Stage::PostUpgrade, version)?;
    Ok(())
}
