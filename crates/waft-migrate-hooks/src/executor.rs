use anyhow::Result;
use tracing::{info, warn};
use waft_migrate_core::{Stage, Version};
use waft_migrate_progress::ProgressStore;

use crate::directives::{is_supported, ModuleProbe};
use crate::interpreter::HookInterpreter;
use crate::resolver::HookResolver;
use crate::script::{HookKind, HookScript};

/// What one stage run did, by script identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub executed: Vec<String>,
    pub already_done: Vec<String>,
    pub unsupported: Vec<String>,
    pub ignored: Vec<String>,
}

pub struct StageExecutor<I, P> {
    resolver: HookResolver,
    interpreter: I,
    probe: P,
}

impl<I, P> StageExecutor<I, P>
where
    I: HookInterpreter,
    P: ModuleProbe,
{
    pub fn new(resolver: HookResolver, interpreter: I, probe: P) -> Self {
        Self {
            resolver,
            interpreter,
            probe,
        }
    }

    pub fn resolver(&self) -> &HookResolver {
        &self.resolver
    }

    pub fn interpreter(&self) -> &I {
        &self.interpreter
    }

    /// Runs every pending, applicable script of `stage` for `version`.
    ///
    /// Scripts execute in the build of `run_at` (defaulting to `version`) and
    /// each one is recorded in `progress` before the next starts.
    pub fn run(
        &mut self,
        progress: &mut ProgressStore,
        version: Version,
        stage: Stage,
        run_at: Option<Version>,
    ) -> Result<StageReport> {
        info!("Loading {version} {stage} scripts...");
        let run_at = run_at.unwrap_or(version);
        let mut report = StageReport::default();

        for script in self.resolver.resolve(version, stage)? {
            let identifier = script.identifier();
            if progress.has_script(version, stage, &identifier) {
                report.already_done.push(identifier);
                continue;
            }
            if !is_supported(&script, run_at, &self.probe)? {
                report.unsupported.push(identifier);
                continue;
            }

            match self.run_script(&script, run_at)? {
                ScriptOutcome::Ran => {
                    progress.mark_script_executed(version, stage, &identifier)?;
                    report.executed.push(identifier);
                }
                ScriptOutcome::NotApplicable => report.unsupported.push(identifier),
                ScriptOutcome::UnknownKind => {
                    warn!(
                        "Unknown file extension for script {}, skipping...",
                        script.file_name()
                    );
                    report.ignored.push(identifier);
                }
            }
        }

        Ok(report)
    }

    fn run_script(&mut self, script: &HookScript, run_at: Version) -> Result<ScriptOutcome> {
        let Some(kind) = script.kind() else {
            return Ok(ScriptOutcome::UnknownKind);
        };
        info!("Running script {}...", script.path().display());

        match kind {
            HookKind::AppScript => self.interpreter.run_app_script(script.path(), run_at)?,
            HookKind::ShellScript => self.interpreter.run_shell_script(script.path(), run_at)?,
            HookKind::SqlScript => self.interpreter.run_sql_script(script.path())?,
            HookKind::RedirectAlias => {
                let target = self.resolver.resolve_alias(script)?;
                // Directives of the shared script apply on top of the alias'.
                if !is_supported(&target, run_at, &self.probe)? {
                    info!(
                        "{} does not apply at {run_at}, skipping alias {}",
                        target.path().display(),
                        script.file_name()
                    );
                    return Ok(ScriptOutcome::NotApplicable);
                }
                return self.run_script(&target, run_at);
            }
        }
        Ok(ScriptOutcome::Ran)
    }
}

enum ScriptOutcome {
    Ran,
    NotApplicable,
    UnknownKind,
}
