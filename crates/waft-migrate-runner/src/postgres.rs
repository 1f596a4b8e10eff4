use std::path::PathBuf;
use std::process::Command;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::command::{command_failure, run_command, RunOptions};

const MAINTENANCE_DATABASE: &str = "postgres";

const MAIL_BACKUP_QUERIES: [(&str, bool); 2] = [
    (
        "CREATE TABLE IF NOT EXISTS fetchmail_server_backup AS SELECT * FROM fetchmail_server",
        false,
    ),
    (
        "CREATE TABLE IF NOT EXISTS ir_mail_server_backup AS SELECT * FROM ir_mail_server",
        true,
    ),
];

const DEFUSE_QUERIES: [(&str, bool); 3] = [
    (
        "UPDATE fetchmail_server SET active = FALSE, server = 'f'",
        false,
    ),
    ("UPDATE ir_cron SET active = FALSE", true),
    (
        "UPDATE ir_mail_server SET active = FALSE, smtp_host = 'f'",
        true,
    ),
];

/// PostgreSQL access for one application database through the client tools
/// (`psql`, `createdb`, `dropdb`), plus the on-disk filestores that belong to
/// each database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Postgres {
    database: String,
    filestore_root: PathBuf,
}

impl Postgres {
    pub fn new(database: impl Into<String>, filestore_root: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
            filestore_root: filestore_root.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn filestore_path(&self, database: &str) -> PathBuf {
        self.filestore_root.join(database)
    }

    pub fn execute(&self, sql: &str) -> Result<()> {
        run_command(
            psql(&self.database).arg("-v").arg("ON_ERROR_STOP=1").arg("-c").arg(sql),
            RunOptions::default(),
        )?;
        Ok(())
    }

    /// Rows of a single-column query, one value per row.
    pub fn query_column(&self, sql: &str) -> Result<Vec<String>> {
        let output = run_command(
            psql(&self.database)
                .arg("-A")
                .arg("-t")
                .arg("-v")
                .arg("ON_ERROR_STOP=1")
                .arg("-c")
                .arg(sql),
            RunOptions::default(),
        )?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Feeds a SQL script to `psql`, aborting at its first error.
    pub fn run_script(&self, content: &str) -> Result<()> {
        let script = format!("\\set ON_ERROR_STOP true\n{content}");
        run_command(&mut psql(&self.database), RunOptions::with_input(&script))?;
        Ok(())
    }

    pub fn can_connect(&self, database: &str) -> bool {
        run_command(
            psql(database).arg("-c").arg("SELECT 1"),
            RunOptions::quiet(),
        )
        .is_ok()
    }

    pub fn modules_installed(&self, modules: &[String]) -> Result<bool> {
        if modules.is_empty() {
            return Ok(true);
        }

        let names = modules
            .iter()
            .map(|module| quote_literal(module))
            .collect::<Vec<_>>()
            .join(", ");
        let installed = self.query_column(&format!(
            "SELECT name FROM ir_module_module \
             WHERE state NOT IN ('uninstalled', 'uninstallable') AND name IN ({names})"
        ))?;
        Ok(modules
            .iter()
            .all(|module| installed.iter().any(|name| name == module)))
    }

    pub fn backup_mail_servers(&self) -> Result<()> {
        self.run_guarded(&MAIL_BACKUP_QUERIES)
    }

    /// Turns off outgoing mail, incoming mail and scheduled jobs so an
    /// upgraded copy never contacts real users.
    pub fn defuse(&self) -> Result<()> {
        self.run_guarded(&DEFUSE_QUERIES)
    }

    /// Drops `database`, treating a failing `dropdb` as "did not exist".
    pub fn drop_database_best_effort(&self, database: &str) -> Result<()> {
        let mut command = Command::new("dropdb");
        command.arg(database);
        match run_command(&mut command, RunOptions::quiet()) {
            Ok(_) => Ok(()),
            Err(err) if command_failure(&err).is_some() => {
                debug!("dropdb {database} failed, assuming it did not exist");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub fn remove_filestore(&self, database: &str) -> Result<()> {
        let filestore = self.filestore_path(database);
        if filestore.exists() {
            let mut command = Command::new("rm");
            command.arg("-rf").arg(&filestore);
            run_command(&mut command, RunOptions::default())?;
        }
        Ok(())
    }

    /// Clones `source` into `target`, including its filestore. With
    /// `move_filestore` the filestore is moved instead of hard-link copied.
    pub fn copy_database(&self, source: &str, target: &str, move_filestore: bool) -> Result<()> {
        info!("Backing up database & filestore to \"{target}\"...");
        self.drop_database_best_effort(target)?;
        let mut createdb = Command::new("createdb");
        createdb.arg(target).arg("-T").arg(source);
        run_command(&mut createdb, RunOptions::default())?;

        let filestore = self.filestore_path(source);
        let new_filestore = self.filestore_path(target);
        if !filestore.exists() {
            warn!("No filestore for {source} to copy to {target}.");
            return Ok(());
        }
        if new_filestore.exists() {
            let mut remove = Command::new("rm");
            remove.arg("-r").arg(&new_filestore);
            run_command(&mut remove, RunOptions::default())?;
        }

        let mut transfer = if move_filestore {
            Command::new("mv")
        } else {
            let mut copy = Command::new("cp");
            copy.arg("-rl");
            copy
        };
        transfer.arg(&filestore).arg(&new_filestore);
        run_command(&mut transfer, RunOptions::default())?;
        Ok(())
    }

    pub fn rename_database(&self, source: &str, target: &str) -> Result<()> {
        info!("Renaming database \"{source}\" to \"{target}\"...");
        self.drop_database_best_effort(target)?;
        run_command(
            psql(MAINTENANCE_DATABASE)
                .arg("-v")
                .arg("ON_ERROR_STOP=1")
                .arg("-c")
                .arg(format!(
                    "ALTER DATABASE {} RENAME TO {}",
                    quote_identifier(source),
                    quote_identifier(target)
                )),
            RunOptions::default(),
        )?;
        Ok(())
    }

    fn run_guarded(&self, queries: &[(&str, bool)]) -> Result<()> {
        for (query, required) in queries {
            if let Err(err) = self.execute(query) {
                if *required {
                    error!("Unable to defuse database, the following query failed:");
                    error!("{query}");
                    return Err(err);
                }
                debug!("optional query failed, continuing: {query}");
            }
        }
        Ok(())
    }
}

fn psql(database: &str) -> Command {
    let mut command = Command::new("psql");
    command.arg("-X").arg("-q").arg("-d").arg(database);
    command
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn quote_identifier(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}
