use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use waft_migrate_core::{Version, WaftLayout};
use waft_migrate_runner::{run_command, Postgres, RunOptions};

/// Executes the concrete kinds of hook script.
pub trait HookInterpreter {
    fn run_app_script(&mut self, script: &Path, run_at: Version) -> Result<()>;
    fn run_shell_script(&mut self, script: &Path, run_at: Version) -> Result<()>;
    fn run_sql_script(&mut self, script: &Path) -> Result<()>;
}

/// Runs hook scripts against the per-version build directories.
#[derive(Debug, Clone)]
pub struct BuildInterpreter {
    layout: WaftLayout,
    final_version: Version,
    postgres: Postgres,
}

impl BuildInterpreter {
    pub fn new(layout: WaftLayout, final_version: Version, postgres: Postgres) -> Self {
        Self {
            layout,
            final_version,
            postgres,
        }
    }
}

impl HookInterpreter for BuildInterpreter {
    fn run_app_script(&mut self, script: &Path, run_at: Version) -> Result<()> {
        let build_dir = self.layout.build_dir(run_at, self.final_version);
        let odoo_conf = build_dir.join("auto").join("odoo.conf");
        let program = app_bootstrap_program(&self.layout.migration_dir(), &odoo_conf, script);

        let mut command = Command::new(build_dir.join(".venv").join("bin").join("python"));
        command
            .current_dir(self.layout.migration_dir())
            .env("MIGRATION_PATH", self.layout.migration_dir());
        run_command(&mut command, RunOptions::with_input(&program))?;
        Ok(())
    }

    fn run_shell_script(&mut self, script: &Path, run_at: Version) -> Result<()> {
        let mut command = Command::new("bash");
        command
            .arg(script)
            .current_dir(self.layout.build_dir(run_at, self.final_version))
            .env("MIGRATION_PATH", self.layout.migration_dir());
        run_command(&mut command, RunOptions::default())?;
        Ok(())
    }

    fn run_sql_script(&mut self, script: &Path) -> Result<()> {
        let content = fs::read_to_string(script)
            .with_context(|| format!("failed to read SQL script: {}", script.display()))?;
        self.postgres.run_script(&content)
    }
}

/// Python program that opens an application environment for the database in
/// `odoo_conf`, binds it to `env` and executes `script` in that scope.
pub fn app_bootstrap_program(migration_dir: &Path, odoo_conf: &Path, script: &Path) -> String {
    format!(
        r#"
import os
import sys
import logging

import odoo
from odoo.tools import config as odoo_config
from click_odoo import OdooEnvironment

MIGRATION_PATH = {migration_path}
ODOO_CONF = {odoo_conf}

def eprint(*args, **kwargs):
    print(*args, file=sys.stderr, **kwargs)

logging.basicConfig(level=logging.DEBUG, stream=sys.stderr, format='%(message)s')

odoo_config.parse_config(["-c", ODOO_CONF])

db_name = odoo_config.get("db_name")
if not db_name:
    eprint("No 'db_name' found in Odoo configuration %r" % ODOO_CONF)
    sys.exit(1)

with OdooEnvironment(database=db_name) as env:
    globals()["env"] = env
    with open({script}) as f:
        __script = f.read()
    exec(__script, globals())
"#,
        migration_path = python_string(migration_dir),
        odoo_conf = python_string(odoo_conf),
        script = python_string(script),
    )
}

fn python_string(path: &Path) -> String {
    let raw = path.display().to_string();
    format!("'{}'", raw.replace('\\', "\\\\").replace('\'', "\\'"))
}
