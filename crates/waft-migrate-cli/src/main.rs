use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use waft_migrate_core::WaftLayout;
use waft_migrate_progress::ProgressStore;

mod actions;
mod config;
mod logging;
mod orchestrator;
mod rebuild;
mod render;

use crate::actions::LiveActions;
use crate::config::{canonical_root, env_snapshot, resolve_params, MigrationParams};
use crate::logging::{init_logging, level_filter};
use crate::orchestrator::{run_migration, MigrationSession};
use crate::rebuild::rebuild_sources;
use crate::render::TerminalRenderer;

#[derive(Parser, Debug, Default)]
#[command(name = "waft-migrate")]
#[command(about = "Step a Waft instance and its database through major ERP releases", long_about = None)]
#[command(version)]
struct Cli {
    /// Database to migrate, instead of PGDATABASE.
    #[arg(short = 'd', long)]
    database: Option<String>,
    /// Also run the enterprise upgrade service and its hook stages.
    #[arg(short = 'e', long)]
    enterprise_enabled: bool,
    /// Release the database is on now, instead of MIGRATION_START_VERSION.
    #[arg(short = 'f', long)]
    start_version: Option<String>,
    /// Skip the stepwise open-source upgrade.
    #[arg(short = 'o', long)]
    open_upgrade_disabled: bool,
    /// Request production (rather than test) upgrades from the enterprise service.
    #[arg(short = 'p', long)]
    production: bool,
    /// Regenerate every build directory of the migration and exit.
    #[arg(short = 'r', long)]
    rebuild: bool,
    /// Forget progress from VERSION[:STAGE] onwards before migrating.
    #[arg(long, value_name = "VERSION[:STAGE]")]
    reset_progress: Option<String>,
    #[arg(short = 'v', long)]
    verbose: bool,
    /// Decline the first offer to resume an interrupted enterprise request.
    #[arg(long)]
    enterprise_dont_resume: bool,
    /// Accept the enterprise upgrade server's SSH host key without checking.
    #[arg(long)]
    enterprise_autotrust_ssh: bool,
    /// First release the enterprise service may upgrade to.
    #[arg(long, value_name = "VERSION")]
    enterprise_jump_to: Option<String>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let renderer = TerminalRenderer::current();
    match run_cli(cli) {
        Ok(()) => {
            renderer.print_status("ok", "migration completed");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err:?}");
            renderer.print_status("fail", &format!("{err:#}"));
            ExitCode::from(1)
        }
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let mut params = resolve_params(&cli, &env_snapshot(), &cwd)?;
    params.root = canonical_root(&params.root)?;
    let layout = WaftLayout::new(&params.root);
    layout.ensure_base_dirs()?;
    init_logging(
        &layout.migration_log_path(),
        level_filter(&params.log_level, params.verbose)?,
    )?;
    export_child_environment(&params, &layout);

    if params.rebuild {
        info!("Rebuilding sources...");
        return rebuild_sources(&params, &layout);
    }

    let mut progress = ProgressStore::open(layout.progress_path())?;
    if let Some(reset) = &params.reset {
        progress.reset(reset.version, reset.stage)?;
    }

    info!(
        "Starting migration from {} to {}...",
        params.start_version, params.target_version
    );
    let mut session = MigrationSession::new(params.plan(), &progress);
    let mut actions = LiveActions::new(&params, layout, progress)?;
    run_migration(&mut session, &mut actions)?;
    info!("Migration completed.");
    Ok(())
}

// Build scripts and hooks read these from their environment.
fn export_child_environment(params: &MigrationParams, layout: &WaftLayout) {
    std::env::set_var("MIGRATION_PATH", layout.migration_dir());
    std::env::set_var("PGDATABASE", &params.database);
}

#[cfg(test)]
mod tests;
