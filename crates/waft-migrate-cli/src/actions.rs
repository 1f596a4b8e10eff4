use std::process::Command;

use anyhow::Result;
use tracing::{error, info};
use waft_migrate_core::{default_filestore_root, Stage, Version, WaftLayout};
use waft_migrate_enterprise::{EnterpriseClient, EnterpriseOptions, RetryPolicy};
use waft_migrate_hooks::{BuildInterpreter, HookResolver, StageExecutor};
use waft_migrate_progress::ProgressStore;
use waft_migrate_runner::{command_failure, run_command, Postgres, RunOptions};

use crate::config::MigrationParams;
use crate::orchestrator::MigrationActions;

/// Migration actions against the real database, build directories and
/// enterprise service.
pub struct LiveActions {
    layout: WaftLayout,
    postgres: Postgres,
    progress: ProgressStore,
    executor: StageExecutor<BuildInterpreter, Postgres>,
    enterprise: Option<EnterpriseClient>,
    start_version: Version,
    target_version: Version,
    verbose: bool,
    no_backups: bool,
}

impl LiveActions {
    pub fn new(params: &MigrationParams, layout: WaftLayout, progress: ProgressStore) -> Result<Self> {
        let postgres = Postgres::new(params.database.clone(), default_filestore_root()?);
        let executor = StageExecutor::new(
            HookResolver::new(layout.clone()),
            BuildInterpreter::new(layout.clone(), params.target_version, postgres.clone()),
            postgres.clone(),
        );

        let enterprise = if params.enterprise_enabled {
            let options = EnterpriseOptions {
                production: params.production,
                decline_first_resume: params.enterprise_dont_resume,
                autotrust_ssh: params.enterprise_autotrust_ssh,
                no_backups: params.no_backups,
                policy: RetryPolicy::default(),
            };
            Some(EnterpriseClient::acquire(
                layout.clone(),
                postgres.clone(),
                options,
            )?)
        } else {
            None
        };

        Ok(Self {
            layout,
            postgres,
            progress,
            executor,
            enterprise,
            start_version: params.start_version,
            target_version: params.target_version,
            verbose: params.verbose,
            no_backups: params.no_backups,
        })
    }

    fn upgrade_command(&self, version: Version) -> Command {
        let build_dir = self.layout.build_dir(version, self.target_version);
        let logfile = self
            .layout
            .upgrade_log_path(self.postgres.database(), version);
        let mut command = Command::new(build_dir.join("run"));
        command
            .current_dir(&build_dir)
            .env("MIGRATION_PATH", self.layout.migration_dir())
            .args(upgrade_args(
                version == self.start_version,
                self.verbose,
            ))
            .arg("--logfile")
            .arg(logfile)
            .arg("--stop-after-init");
        command
    }

    fn back_up(&self, version: Version) -> Result<()> {
        let database = self.postgres.database();
        let backup = format!("{database}-{version}");
        info!("Backing up database to {backup}...");
        if let Err(err) = self.postgres.copy_database(database, &backup, false) {
            if command_failure(&err).is_some() {
                error!(
                    "Failed to back up the database. The migrated database still exists; \
                     resolve the error, execute the following command and restart the \
                     migration:\ncreatedb \"{backup}\" -T \"{database}\""
                );
            }
            return Err(err);
        }
        Ok(())
    }
}

impl MigrationActions for LiveActions {
    fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    fn prepare_database(&mut self) -> Result<()> {
        self.postgres.backup_mail_servers()?;
        self.postgres.defuse()
    }

    fn run_stage(&mut self, version: Version, stage: Stage, run_at: Version) -> Result<()> {
        let report = self
            .executor
            .run(&mut self.progress, version, stage, Some(run_at))?;
        if !report.executed.is_empty() {
            info!(
                "{version} {stage}: {} script(s) executed",
                report.executed.len()
            );
        }
        Ok(())
    }

    fn run_upgrade(&mut self, version: Version) -> Result<()> {
        run_command(&mut self.upgrade_command(version), RunOptions::default())?;

        info!("Defusing database...");
        self.postgres.defuse()?;
        if !self.no_backups {
            self.back_up(version)?;
        }
        self.progress.mark_upgrade_done(version)
    }

    fn run_enterprise_upgrade(&mut self, version: Version) -> Result<()> {
        let Some(client) = &self.enterprise else {
            anyhow::bail!("enterprise upgrade to {version} requested without enterprise mode");
        };
        client.upgrade(version)?;
        self.progress.mark_enterprise_done(version)?;
        client.fold_into_primary(version)
    }
}

/// Arguments of the build's `run` script ahead of `--logfile`.
pub fn upgrade_args(baseline: bool, verbose: bool) -> Vec<&'static str> {
    let mut args = vec!["-u", "base"];
    if !baseline {
        args.push("--load=openupgrade_framework");
    }
    if verbose {
        args.push("--log-level=debug_sql");
        args.push("--log-handler=odoo.modules.loading:DEBUG");
        if !baseline {
            args.push("--log-handler=odoo.modules.migration:DEBUG");
        }
    }
    args
}
