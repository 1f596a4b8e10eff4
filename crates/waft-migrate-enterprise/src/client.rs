use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, info, warn};
use waft_migrate_core::{Version, WaftLayout};
use waft_migrate_runner::{command_failure, Postgres};

use crate::events::{classify_line, LineEvent, PromptResponder};
use crate::policy::{classify_exit, AttemptVerdict, EnterpriseUpgradeError, RetryPolicy};
use crate::process::{ScriptLauncher, UpgradeLauncher, UpgradeProcess};
use crate::script::{
    download_upgrade_script, patch_upgrade_script, write_upgrade_script, ScriptPatch, SshTrust,
    UPGRADE_SCRIPT_URL,
};
use crate::tail::{LineSource, LogTail};

/// Tells whether a database accepts connections.
pub trait DatabaseProbe {
    fn can_connect(&self, database: &str) -> Result<bool>;
}

impl DatabaseProbe for Postgres {
    fn can_connect(&self, database: &str) -> Result<bool> {
        Ok(Postgres::can_connect(self, database))
    }
}

#[derive(Debug, Clone)]
pub struct EnterpriseOptions {
    pub production: bool,
    pub decline_first_resume: bool,
    pub autotrust_ssh: bool,
    pub no_backups: bool,
    pub policy: RetryPolicy,
}

/// Runs the vendor's enterprise upgrade tool and folds its result back into
/// the primary database.
#[derive(Debug, Clone)]
pub struct EnterpriseClient {
    layout: WaftLayout,
    postgres: Postgres,
    script: PathBuf,
    options: EnterpriseOptions,
}

impl EnterpriseClient {
    /// Downloads and patches the upgrade tool, then builds a client for it.
    pub fn acquire(layout: WaftLayout, postgres: Postgres, options: EnterpriseOptions) -> Result<Self> {
        let code = download_upgrade_script(UPGRADE_SCRIPT_URL)?;
        let patch = ScriptPatch {
            logfile_dir: layout.logfile_dir(),
            ssh: if options.autotrust_ssh {
                SshTrust::AutoTrust
            } else {
                SshTrust::KnownHosts(layout.ssh_known_hosts_path())
            },
        };
        let script = write_upgrade_script(&patch_upgrade_script(&code, &patch)?)?;
        Ok(Self::new(layout, postgres, script, options))
    }

    pub fn new(
        layout: WaftLayout,
        postgres: Postgres,
        script: impl Into<PathBuf>,
        options: EnterpriseOptions,
    ) -> Self {
        Self {
            layout,
            postgres,
            script: script.into(),
            options,
        }
    }

    pub fn enterprise_database(&self, version: Version) -> String {
        format!("{}-{version}-enterprise", self.postgres.database())
    }

    /// Upgrades the primary database to `version` into the `-enterprise`
    /// database, retrying transient failures.
    pub fn upgrade(&self, version: Version) -> Result<()> {
        info!("Running enterprise upgrade to {version}...");
        let enterprise_database = self.enterprise_database(version);
        self.postgres.drop_database_best_effort(&enterprise_database)?;
        self.postgres.remove_filestore(&enterprise_database)?;

        let log_path = self
            .layout
            .enterprise_log_path(self.postgres.database(), version);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to create {}", log_path.display()))?;
        let mut lines = LogTail::open_at_end(&log_path)?;

        let mut launcher = ScriptLauncher::new(
            &self.script,
            self.postgres.database(),
            self.options.production,
        );
        let mut responder = PromptResponder::new(self.options.decline_first_resume);
        drive_upgrade(
            self.options.policy,
            &mut launcher,
            &mut lines,
            &self.postgres,
            &mut responder,
            &enterprise_database,
            version,
        )?;
        Ok(())
    }

    /// Replaces the primary database with the `-enterprise` one.
    ///
    /// Moves the filestore along with a copy of the database, or renames the
    /// database outright when backups are disabled.
    pub fn fold_into_primary(&self, version: Version) -> Result<()> {
        let enterprise_database = self.enterprise_database(version);
        let database = self.postgres.database();
        let result = if self.options.no_backups {
            self.postgres.rename_database(&enterprise_database, database)
        } else {
            self.postgres
                .copy_database(&enterprise_database, database, true)
        };

        if let Err(err) = result {
            if command_failure(&err).is_some() {
                error!(
                    "Failed because we weren't able to get the enterprise database in place of \
                     the original one. The migrated database still exists; resolve the error, \
                     execute the following command and restart the migration:\n\
                     createdb \"{database}\" -T \"{enterprise_database}\""
                );
            }
            return Err(err);
        }
        Ok(())
    }
}

/// Launches attempts until the `-enterprise` database shows up.
///
/// Returns the number of attempts used.
pub fn drive_upgrade<L, S, D>(
    policy: RetryPolicy,
    launcher: &mut L,
    lines: &mut S,
    probe: &D,
    responder: &mut PromptResponder,
    enterprise_database: &str,
    version: Version,
) -> Result<u32>
where
    L: UpgradeLauncher,
    S: LineSource,
    D: DatabaseProbe,
{
    for attempt in 1..=policy.max_attempts {
        let mut process = launcher.launch(version, attempt)?;
        let spinner = attempt_spinner(version, attempt);
        let verdict = watch_attempt(
            policy,
            &mut process,
            lines,
            probe,
            responder,
            enterprise_database,
            &spinner,
        );
        spinner.finish_and_clear();
        process.kill();

        match verdict? {
            AttemptVerdict::Succeeded => {
                info!("Enterprise upgrade to {version} completed after {attempt} attempt(s)");
                return Ok(attempt);
            }
            AttemptVerdict::Retry => warn!("Timeout error, retrying..."),
            AttemptVerdict::Fail { exit_code } => {
                return Err(EnterpriseUpgradeError::Failed {
                    version,
                    exit_code,
                    database: enterprise_database.to_string(),
                }
                .into())
            }
        }
    }

    Err(EnterpriseUpgradeError::AttemptsExhausted {
        version,
        attempts: policy.max_attempts,
    }
    .into())
}

fn watch_attempt<P, S, D>(
    policy: RetryPolicy,
    process: &mut P,
    lines: &mut S,
    probe: &D,
    responder: &mut PromptResponder,
    enterprise_database: &str,
    spinner: &ProgressBar,
) -> Result<AttemptVerdict>
where
    P: UpgradeProcess,
    S: LineSource,
    D: DatabaseProbe,
{
    loop {
        if let Some(line) = lines.next_line()? {
            debug!("{line}");
            match classify_line(&line) {
                LineEvent::CommunicationError => return Ok(AttemptVerdict::Retry),
                LineEvent::ResumePrompt => process.answer(responder.respond())?,
                LineEvent::Output => {}
            }
            continue;
        }

        if let Some(exit) = process.try_exit()? {
            debug!("enterprise upgrade tool exited with code {}", exit.code);
            let database_ready = probe.can_connect(enterprise_database)?;
            return Ok(classify_exit(&exit, database_ready));
        }

        spinner.tick();
        if !policy.poll_interval.is_zero() {
            thread::sleep(policy.poll_interval);
        }
    }
}

fn attempt_spinner(version: Version, attempt: u32) -> ProgressBar {
    if !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed_precise}") {
        spinner.set_style(style);
    }
    spinner.set_message(format!("enterprise upgrade to {version}, attempt {attempt}"));
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}
