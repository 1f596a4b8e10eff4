use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use tracing::info;

pub const UPGRADE_SCRIPT_URL: &str = "https://upgrade.odoo.com/upgrade";

const DB_NAME_FUNCTION: &str = "def get_upgraded_db_name(dbname, target, aim):";
const FUNCTION_RETURN: &str = "\n    return";
const DB_NAME_BODY: &str = "    return dbname + '-' + target + '-enterprise'";
const LOGGING_CALL: &str = "logging.basicConfig(";
const SSH_IDENTITIES: &str = "-o IdentitiesOnly=yes";

/// How the tool's SSH connections treat the upgrade server's host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshTrust {
    /// Accept any host key and remember none.
    AutoTrust,
    /// Pin known hosts to a file owned by the migration.
    KnownHosts(PathBuf),
}

/// Adjustments applied to the downloaded upgrade tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPatch {
    pub logfile_dir: PathBuf,
    pub ssh: SshTrust,
}

pub fn download_upgrade_script(url: &str) -> Result<String> {
    info!("Downloading enterprise upgrade script from {url}...");
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("failed to build HTTP client")?;
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to download enterprise upgrade script: {url}"))?
        .error_for_status()
        .with_context(|| format!("enterprise upgrade script download was rejected: {url}"))?;
    response
        .text()
        .with_context(|| format!("failed to read enterprise upgrade script: {url}"))
}

/// Rewrites the tool so the upgraded database is `<db>-<target>-enterprise`,
/// its log lands in `logfile_dir` and SSH follows `patch.ssh`.
pub fn patch_upgrade_script(code: &str, patch: &ScriptPatch) -> Result<String> {
    let code = replace_db_name_body(code)?;

    if !code.contains(LOGGING_CALL) {
        bail!("enterprise upgrade script has no '{LOGGING_CALL}' call to redirect");
    }
    let log_pattern = patch
        .logfile_dir
        .join("%s-%s-enterprise.log")
        .display()
        .to_string();
    let code = code.replace(
        LOGGING_CALL,
        &format!(
            "{LOGGING_CALL}\n        filename=\"{log_pattern}\" % (args.dbname, args.target),\n"
        ),
    );

    let ssh_options = match &patch.ssh {
        SshTrust::AutoTrust => {
            format!("{SSH_IDENTITIES} -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null")
        }
        SshTrust::KnownHosts(path) => {
            format!("{SSH_IDENTITIES} -o \\\"UserKnownHostsFile={}\\\"", path.display())
        }
    };
    Ok(code.replace(SSH_IDENTITIES, &ssh_options))
}

// The line right after the signature (the docstring) is kept; everything
// from there through the first top-level `return` is replaced.
fn replace_db_name_body(code: &str) -> Result<String> {
    let Some(signature) = code.find(DB_NAME_FUNCTION) else {
        bail!("enterprise upgrade script has no '{DB_NAME_FUNCTION}'");
    };
    let after_signature = signature + DB_NAME_FUNCTION.len();
    let Some(body_start) = line_end_after(code, after_signature + 1) else {
        bail!("enterprise upgrade script ends inside get_upgraded_db_name");
    };
    let Some(return_at) = code[body_start..].find(FUNCTION_RETURN) else {
        bail!("get_upgraded_db_name in enterprise upgrade script has no return");
    };
    let return_at = body_start + return_at;
    let body_end = line_end_after(code, return_at + 1).unwrap_or(code.len());

    Ok(format!(
        "{}{DB_NAME_BODY}\n{}",
        &code[..body_start],
        &code[body_end..]
    ))
}

fn line_end_after(code: &str, from: usize) -> Option<usize> {
    code.get(from..)?.find('\n').map(|offset| from + offset + 1)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Writes the patched tool to a fresh private file in the temporary
/// directory and returns its path.
pub fn write_upgrade_script(code: &str) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("waft-migrate-")
        .suffix("-enterprise-upgrade.py")
        .tempfile()
        .context("failed to create enterprise upgrade script")?;
    file.write_all(code.as_bytes()).with_context(|| {
        format!("failed to write enterprise upgrade script: {}", file.path().display())
    })?;
    let (_, path) = file
        .keep()
        .context("failed to keep enterprise upgrade script")?;
    info!(
        "Enterprise upgrade script saved to {} (sha256 {})",
        path.display(),
        sha256_hex(code.as_bytes())
    );
    Ok(path)
}
