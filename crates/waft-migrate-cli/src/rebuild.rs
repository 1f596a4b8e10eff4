use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};
use serde_yaml::{Mapping, Value};
use tracing::info;
use waft_migrate_core::{build_versions, enterprise_build_versions, Version, WaftLayout};
use waft_migrate_runner::{run_attached, run_command, RunOptions};

use crate::config::MigrationParams;

const TOOLKIT_REMOTE: &str = "sunflowerit";
const TOOLKIT_URL: &str = "https://github.com/sunflowerit/waft";
const OPENUPGRADE_URL: &str = "https://github.com/OCA/OpenUpgrade";
const OCB_URL: &str = "https://github.com/OCA/OCB";
const ODOO_URL: &str = "https://github.com/odoo/odoo";
const DEPTH_DEFAULT: &str = "${WAFT_DEPTH_DEFAULT}";

/// Regenerates every build directory the migration will run code in.
pub fn rebuild_sources(params: &MigrationParams, layout: &WaftLayout) -> Result<()> {
    let old_repos_path = layout.root().join("custom").join("src").join("old-repos.yaml");
    let whitelist = repo_whitelist(read_yaml_mapping(&old_repos_path)?.as_ref());
    let default_repos = read_yaml_mapping(&layout.toolkit_dir().join("default-repos.yaml"))?
        .context("waftlib/migration/default-repos.yaml is missing")?;

    let versions = if params.enterprise_enabled {
        enterprise_build_versions(
            params.start_version,
            params.target_version,
            params.enterprise_jump_to,
        )
    } else {
        build_versions(params.start_version, params.target_version)
    };

    for version in versions {
        let build_dir = layout.build_dir(version, params.target_version);
        let is_root = build_dir == layout.root();
        if !build_dir.join("bootstrap").exists() {
            init_build_dir(&build_dir, is_root)?;
        }

        info!("Rebuilding build-{version}...");
        let repos_file = build_dir.join("custom").join("src").join("repos.yaml");
        let repos_file_existed = repos_file.exists();

        write_env_secret(params, layout, &build_dir, version)?;
        if !is_root {
            run_attached(Command::new(build_dir.join("bootstrap")).current_dir(&build_dir))?;
        }

        if !repos_file_existed {
            if let Some(parent) = repos_file.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            if version == params.start_version {
                if !old_repos_path.exists() {
                    bail!("Put a copy of the original repos.yaml in custom/src/old-repos.yaml");
                }
                fs::copy(&old_repos_path, &repos_file).with_context(|| {
                    format!("failed to copy old-repos.yaml to {}", repos_file.display())
                })?;
            } else {
                let template = read_yaml_mapping(
                    &layout.toolkit_build_dir(version).join("repos.yaml"),
                )?;
                let mut config = merge_repo_configs(&default_repos, template.as_ref());
                prepare_odoo_entry(&mut config, version, params.enterprise_enabled);
                let limited = exclude_repos(&config, &whitelist);
                let raw = serde_yaml::to_string(&limited).context("failed to render repos.yaml")?;
                fs::write(&repos_file, raw)
                    .with_context(|| format!("failed to write {}", repos_file.display()))?;
            }
        }

        run_attached(Command::new(build_dir.join("build")).current_dir(&build_dir))?;
        run_attached(
            Command::new(build_dir.join(".venv").join("bin").join("pip"))
                .arg("install")
                .arg(layout.migration_api_dir()),
        )?;

        let conf_path = build_dir.join("auto").join("odoo.conf");
        let conf = fs::read_to_string(&conf_path)
            .with_context(|| format!("failed to read {}", conf_path.display()))?;
        let logfile = layout.upgrade_log_path(&params.database, version);
        let conf = rewrite_odoo_conf(&conf, &build_dir, &logfile, version, params.start_version);
        fs::write(&conf_path, conf)
            .with_context(|| format!("failed to write {}", conf_path.display()))?;
    }
    Ok(())
}

fn init_build_dir(build_dir: &Path, is_root: bool) -> Result<()> {
    fs::create_dir_all(build_dir)
        .with_context(|| format!("failed to create {}", build_dir.display()))?;
    git(build_dir, &["init"])?;
    git(build_dir, &["remote", "add", TOOLKIT_REMOTE, TOOLKIT_URL])?;
    if !is_root {
        git(build_dir, &["pull", TOOLKIT_REMOTE, "master"])?;
        let git_dir = build_dir.join(".git");
        fs::remove_dir_all(&git_dir)
            .with_context(|| format!("failed to remove {}", git_dir.display()))?;
    }
    Ok(())
}

fn git(cwd: &Path, args: &[&str]) -> Result<()> {
    let mut command = Command::new("git");
    command.args(args).current_dir(cwd);
    run_command(&mut command, RunOptions::default())?;
    Ok(())
}

fn write_env_secret(
    params: &MigrationParams,
    layout: &WaftLayout,
    build_dir: &Path,
    version: Version,
) -> Result<()> {
    let path = build_dir.join(".env-secret");
    if !path.exists() {
        let template = layout.templates_dir().join(".env-secret");
        fs::copy(&template, &path)
            .with_context(|| format!("failed to copy {} to {}", template.display(), path.display()))?;
    }
    let content =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let rewritten = rewrite_env_secret(&content, &env_secret_overrides(params, version));
    fs::write(&path, rewritten).with_context(|| format!("failed to write {}", path.display()))
}

/// Values forced into a build's `.env-secret`, in file order.
pub fn env_secret_overrides(params: &MigrationParams, version: Version) -> Vec<(&'static str, String)> {
    let mut overrides = vec![
        ("ODOO_VERSION", version.to_string()),
        ("PGDATABASE", params.database.clone()),
        ("ODOO_DBFILTER", format!("^{}$", params.database)),
        ("LOG_LEVEL", "DEBUG".to_string()),
        // An empty PGPORT from the template would be taken as the port.
        ("PGPORT", "5432".to_string()),
    ];
    if let Some(password) = &params.pg_password {
        overrides.push(("PGPASSWORD", password.clone()));
    }
    if params.enterprise_enabled {
        overrides.push(("DEFAULT_REPO_PATTERN_ODOO", format!("{ODOO_URL}.git")));
    } else if version < Version::major_release(14) && version != params.start_version {
        overrides.push(("DEFAULT_REPO_PATTERN_ODOO", format!("{OPENUPGRADE_URL}.git")));
    }
    overrides
}

/// Keeps `KEY=value` lines, replacing overridden keys in place and appending
/// the overrides the file lacked.
pub fn rewrite_env_secret(content: &str, overrides: &[(&'static str, String)]) -> String {
    let mut lines = Vec::new();
    let mut rewritten = Vec::new();
    for line in content.lines() {
        let Some((key, _)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        match overrides.iter().find(|(name, _)| *name == key) {
            Some((name, value)) => {
                lines.push(format!("{name}=\"{value}\""));
                rewritten.push(*name);
            }
            None => lines.push(line.trim().to_string()),
        }
    }
    for (name, value) in overrides {
        if !rewritten.contains(name) {
            lines.push(format!("{name}=\"{value}\""));
        }
    }

    let mut output = lines.join("\n");
    output.push('\n');
    output
}

pub fn repo_whitelist(old_repos: Option<&Mapping>) -> Vec<String> {
    let mut whitelist = old_repos
        .map(|config| {
            config
                .keys()
                .filter_map(|key| key.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    whitelist.push("openupgrade".to_string());
    whitelist
}

/// Top-level entries of `template` replace those of `defaults`.
pub fn merge_repo_configs(defaults: &Mapping, template: Option<&Mapping>) -> Mapping {
    let mut merged = defaults.clone();
    if let Some(template) = template {
        for (key, value) in template {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Points the `odoo` repository at the code base able to run the upgrade to
/// `version`, folding any `ocb` entry's extra remotes into it.
pub fn prepare_odoo_entry(config: &mut Mapping, version: Version, enterprise_enabled: bool) {
    if enterprise_enabled {
        config.insert("odoo".into(), repo_entry("odoo", ODOO_URL));
        return;
    }

    let odoo_url = if version < Version::major_release(14) {
        OPENUPGRADE_URL
    } else {
        OCB_URL
    };
    let mut odoo = repo_entry("oca", odoo_url);

    if let Some(ocb) = config.get("ocb").cloned() {
        fold_ocb_entry(&mut odoo, &ocb, odoo_url);
        *config = config
            .iter()
            .filter(|(key, _)| key.as_str() != Some("ocb"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
    }
    config.insert("odoo".into(), odoo);

    if version >= Version::major_release(14) {
        config.insert("openupgrade".into(), repo_entry("oca", OPENUPGRADE_URL));
    }
}

fn fold_ocb_entry(odoo: &mut Value, ocb: &Value, odoo_url: &str) {
    let extra_remotes: Mapping = ocb
        .get("remotes")
        .and_then(Value::as_mapping)
        .map(|remotes| {
            remotes
                .iter()
                .filter(|(_, url)| !url.as_str().is_some_and(|url| url.starts_with(odoo_url)))
                .map(|(name, url)| (name.clone(), url.clone()))
                .collect()
        })
        .unwrap_or_default();
    let extra_merges: Vec<Value> = ocb
        .get("merges")
        .and_then(Value::as_sequence)
        .map(|merges| {
            merges
                .iter()
                .filter(|merge| {
                    merge
                        .as_str()
                        .and_then(|merge| merge.split_whitespace().next())
                        .is_some_and(|remote| extra_remotes.contains_key(remote))
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    let ocb_depth = ocb
        .get("defaults")
        .and_then(|defaults| defaults.get("depth"))
        .cloned();

    let Some(entry) = odoo.as_mapping_mut() else {
        return;
    };
    if let Some(Value::Mapping(remotes)) = entry.get_mut("remotes") {
        for (name, url) in extra_remotes {
            remotes.insert(name, url);
        }
    }
    let mut has_merges = false;
    if let Some(Value::Sequence(merges)) = entry.get_mut("merges") {
        merges.extend(extra_merges);
        has_merges = !merges.is_empty();
    }
    if let Some(Value::Mapping(defaults)) = entry.get_mut("defaults") {
        // Merged branches are not always maintained, so they are not shallow.
        if has_merges {
            *defaults = defaults
                .iter()
                .filter(|(key, _)| key.as_str() != Some("depth"))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
        }
        if let Some(depth) = ocb_depth {
            defaults.insert("depth".into(), depth);
        }
    }
}

fn repo_entry(remote: &str, url: &str) -> Value {
    let mut defaults = Mapping::new();
    defaults.insert("depth".into(), DEPTH_DEFAULT.into());
    let mut remotes = Mapping::new();
    remotes.insert(remote.into(), url.into());

    let mut entry = Mapping::new();
    entry.insert("defaults".into(), Value::Mapping(defaults));
    entry.insert("remotes".into(), Value::Mapping(remotes));
    entry.insert(
        "merges".into(),
        Value::Sequence(vec![format!("{remote} ${{ODOO_VERSION}}").into()]),
    );
    Value::Mapping(entry)
}

pub fn exclude_repos(config: &Mapping, whitelist: &[String]) -> Mapping {
    config
        .iter()
        .filter(|(name, _)| {
            name.as_str()
                .is_some_and(|name| whitelist.iter().any(|allowed| allowed == name))
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Points the build's server configuration at the migration log and, from
/// 14.0 on, at the OpenUpgrade scripts.
pub fn rewrite_odoo_conf(
    content: &str,
    build_dir: &Path,
    logfile: &Path,
    version: Version,
    start_version: Version,
) -> String {
    let before_9 = version < Version::major_release(9);
    let modern = version >= Version::major_release(14);

    let mut dropped = vec!["logfile ="];
    if before_9 {
        dropped.push("db_port =");
    }
    if modern {
        dropped.extend(["upgrade_path =", "server_wide_modules ="]);
    }

    let mut lines = content
        .lines()
        .filter(|line| !dropped.iter().any(|marker| line.contains(marker)))
        .map(str::to_string)
        .collect::<Vec<_>>();
    lines.push(format!("logfile = {}", logfile.display()));
    if before_9 {
        lines.push("db_port = 5432".to_string());
    }
    if modern && version != start_version {
        lines.push(format!(
            "upgrade_path = {}",
            build_dir
                .join("custom/src/openupgrade/openupgrade_scripts/scripts")
                .display()
        ));
        lines.push("server_wide_modules = openupgrade_framework".to_string());
    }
    if version <= Version::major_release(10) {
        lines.push("running_env = dev".to_string());
    }

    let mut output = lines.join("\n");
    output.push('\n');
    output
}

fn read_yaml_mapping(path: &Path) -> Result<Option<Mapping>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value =
        serde_yaml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
    match value {
        Value::Mapping(mapping) => Ok(Some(mapping)),
        Value::Null => Ok(Some(Mapping::new())),
        _ => bail!("expected a mapping of repositories in {}", path.display()),
    }
}
