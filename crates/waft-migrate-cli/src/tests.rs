use super::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::bail;
use serde_yaml::{Mapping, Value};
use tracing_subscriber::filter::LevelFilter;
use waft_migrate_core::{Stage, Version};

use crate::actions::upgrade_args;
use crate::config::{
    canonical_root, env_flag, parse_reset, ConfigError, EnvSnapshot,
    DEFAULT_ENTERPRISE_MINIMUM_TARGET,
};
use crate::orchestrator::{MigrationActions, MigrationPlan};
use crate::rebuild::{
    env_secret_overrides, exclude_repos, merge_repo_configs, prepare_odoo_entry, repo_whitelist,
    rewrite_env_secret, rewrite_odoo_conf,
};
use crate::render::{render_status_line, resolve_output_style, OutputStyle};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_dir() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "waft-migrate-cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&path).expect("must create test dir");
    path
}

fn v(raw: &str) -> Version {
    Version::parse(raw).expect("version must parse")
}

/// Records what the walk asked for against a real progress file, and can be
/// told to crash before its n-th side effect.
struct FakeActions {
    progress: ProgressStore,
    events: Vec<String>,
    run_at: Vec<(String, Version)>,
    crash_before: Option<usize>,
    effects: usize,
}

impl FakeActions {
    fn open(path: &Path) -> Self {
        Self {
            progress: ProgressStore::open(path).expect("must open progress"),
            events: Vec::new(),
            run_at: Vec::new(),
            crash_before: None,
            effects: 0,
        }
    }

    fn crashing_before(path: &Path, effect: usize) -> Self {
        Self {
            crash_before: Some(effect),
            ..Self::open(path)
        }
    }

    fn side_effect(&mut self) -> Result<()> {
        if self.crash_before == Some(self.effects) {
            bail!("simulated crash before side effect {}", self.effects);
        }
        self.effects += 1;
        Ok(())
    }

    fn upgrades(&self, prefix: &str) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|event| event.strip_prefix(prefix))
            .map(str::to_string)
            .collect()
    }
}

impl MigrationActions for FakeActions {
    fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    fn prepare_database(&mut self) -> Result<()> {
        Ok(())
    }

    fn run_stage(&mut self, version: Version, stage: Stage, run_at: Version) -> Result<()> {
        if self.progress.has_script(version, stage, "hook.sh") {
            return Ok(());
        }
        self.side_effect()?;
        self.progress.mark_script_executed(version, stage, "hook.sh")?;
        let event = format!("{version} {stage}");
        self.run_at.push((event.clone(), run_at));
        self.events.push(event);
        Ok(())
    }

    fn run_upgrade(&mut self, version: Version) -> Result<()> {
        self.side_effect()?;
        self.progress.mark_upgrade_done(version)?;
        self.events.push(format!("upgrade {version}"));
        Ok(())
    }

    fn run_enterprise_upgrade(&mut self, version: Version) -> Result<()> {
        self.side_effect()?;
        self.progress.mark_enterprise_done(version)?;
        self.events.push(format!("enterprise {version}"));
        Ok(())
    }
}

fn plan(start: &str, target: &str) -> MigrationPlan {
    MigrationPlan {
        start_version: v(start),
        target_version: v(target),
        enterprise_enabled: false,
        enterprise_minimum_target: DEFAULT_ENTERPRISE_MINIMUM_TARGET,
        open_upgrade_disabled: false,
        skip_initial_upgrade: false,
    }
}

fn migrate(plan: MigrationPlan, actions: &mut FakeActions) -> Result<()> {
    let mut session = MigrationSession::new(plan, &actions.progress);
    run_migration(&mut session, actions)
}

#[test]
fn steps_one_release_at_a_time_without_baseline() {
    let dir = test_dir();
    let plan = MigrationPlan {
        skip_initial_upgrade: true,
        ..plan("12.0", "14.0")
    };
    let mut actions = FakeActions::open(&dir.join("progress.json"));

    migrate(plan, &mut actions).expect("migration must succeed");

    assert_eq!(
        actions.events,
        vec![
            "12.0 pre-migration",
            "13.0 pre-upgrade",
            "13.0 pre-openupgrade",
            "upgrade 13.0",
            "13.0 post-upgrade",
            "14.0 pre-upgrade",
            "14.0 pre-openupgrade",
            "upgrade 14.0",
            "14.0 post-upgrade",
            "14.0 post-migration",
        ]
    );
    assert!(actions.upgrades("enterprise ").is_empty());
    assert!(actions.progress.is_upgrade_done(v("14.0")));
    assert!(!actions.progress.is_upgrade_done(v("12.0")));

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn only_pre_upgrade_runs_against_the_previous_release() {
    let dir = test_dir();
    let plan = MigrationPlan {
        skip_initial_upgrade: true,
        ..plan("12.0", "14.0")
    };
    let mut actions = FakeActions::open(&dir.join("progress.json"));

    migrate(plan, &mut actions).expect("migration must succeed");

    let run_at = |event: &str| {
        actions
            .run_at
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, version)| *version)
            .expect("stage must have run")
    };
    assert_eq!(run_at("13.0 pre-upgrade"), v("12.0"));
    assert_eq!(run_at("13.0 pre-openupgrade"), v("13.0"));
    assert_eq!(run_at("13.0 post-upgrade"), v("13.0"));
    assert_eq!(run_at("14.0 pre-upgrade"), v("13.0"));
    assert_eq!(run_at("14.0 post-migration"), v("14.0"));

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn enterprise_upgrade_stages_run_against_the_new_release() {
    let dir = test_dir();
    let plan = MigrationPlan {
        enterprise_enabled: true,
        skip_initial_upgrade: true,
        ..plan("14.0", "15.0")
    };
    let mut actions = FakeActions::open(&dir.join("progress.json"));

    migrate(plan, &mut actions).expect("migration must succeed");

    let run_at = |event: &str| {
        actions
            .run_at
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, version)| *version)
            .expect("stage must have run")
    };
    assert_eq!(run_at("15.0 pre-upgrade"), v("14.0"));
    assert_eq!(run_at("15.0 enterprise/post-upgrade"), v("15.0"));
    assert_eq!(run_at("15.0 pre-openupgrade"), v("15.0"));
    assert_eq!(run_at("15.0 post-upgrade"), v("15.0"));

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn baseline_upgrade_runs_on_the_start_release() {
    let dir = test_dir();
    let mut actions = FakeActions::open(&dir.join("progress.json"));

    migrate(plan("12.0", "13.0"), &mut actions).expect("migration must succeed");

    assert_eq!(actions.upgrades("upgrade "), vec!["12.0", "13.0"]);
    assert_eq!(actions.events[0], "12.0 pre-migration");
    assert_eq!(actions.events[1], "upgrade 12.0");

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn completed_migration_is_a_no_op_when_rerun() {
    let dir = test_dir();
    let progress_path = dir.join("progress.json");
    let mut first = FakeActions::open(&progress_path);
    migrate(plan("12.0", "14.0"), &mut first).expect("migration must succeed");

    let mut second = FakeActions::open(&progress_path);
    migrate(plan("12.0", "14.0"), &mut second).expect("rerun must succeed");

    assert!(second.events.is_empty(), "rerun did {:?}", second.events);
    assert_eq!(second.progress.records(), first.progress.records());

    let _ = fs::remove_dir_all(dir);
}

fn assert_resumes_after_any_crash(plan: MigrationPlan) {
    let dir = test_dir();
    let mut reference = FakeActions::open(&dir.join("reference.json"));
    migrate(plan, &mut reference).expect("migration must succeed");
    let total = reference.events.len();

    for crash_point in 0..total {
        let progress_path = dir.join(format!("progress-{crash_point}.json"));
        let mut crashed = FakeActions::crashing_before(&progress_path, crash_point);
        let err = migrate(plan, &mut crashed).expect_err("crashing run must fail");
        assert!(err.to_string().contains("simulated crash"));

        let mut resumed = FakeActions::open(&progress_path);
        migrate(plan, &mut resumed).expect("resumed run must succeed");

        let mut combined = crashed.events.clone();
        combined.extend(resumed.events.iter().cloned());
        assert_eq!(combined, reference.events, "crash before effect {crash_point}");
        assert_eq!(resumed.progress.records(), reference.progress.records());
    }

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn crash_at_any_point_resumes_without_repeating_work() {
    assert_resumes_after_any_crash(plan("12.0", "14.0"));
}

#[test]
fn crash_during_enterprise_jump_resumes_without_repeating_work() {
    assert_resumes_after_any_crash(MigrationPlan {
        enterprise_enabled: true,
        ..plan("12.0", "16.0")
    });
}

#[test]
fn reset_replays_from_the_requested_stage() {
    let dir = test_dir();
    let progress_path = dir.join("progress.json");
    let mut first = FakeActions::open(&progress_path);
    migrate(plan("12.0", "14.0"), &mut first).expect("migration must succeed");

    let mut store = ProgressStore::open(&progress_path).expect("must reopen progress");
    store
        .reset(v("13.0"), Stage::PreOpenupgrade)
        .expect("reset must succeed");
    drop(store);

    let mut second = FakeActions::open(&progress_path);
    migrate(plan("12.0", "14.0"), &mut second).expect("rerun must succeed");

    assert_eq!(
        second.events,
        vec![
            "13.0 pre-openupgrade",
            "upgrade 13.0",
            "13.0 post-upgrade",
            "14.0 pre-upgrade",
            "14.0 pre-openupgrade",
            "upgrade 14.0",
            "14.0 post-upgrade",
            "14.0 post-migration",
        ]
    );

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn enterprise_jump_skips_intermediate_releases() {
    let dir = test_dir();
    let plan = MigrationPlan {
        enterprise_enabled: true,
        ..plan("12.0", "16.0")
    };
    let mut actions = FakeActions::open(&dir.join("progress.json"));

    migrate(plan, &mut actions).expect("migration must succeed");

    assert_eq!(actions.upgrades("enterprise "), vec!["15.0", "16.0"]);
    assert_eq!(actions.upgrades("upgrade "), vec!["12.0", "15.0", "16.0"]);
    assert!(!actions
        .events
        .iter()
        .any(|event| event.starts_with("13.0") || event.starts_with("14.0")));

    let jump = actions
        .events
        .iter()
        .position(|event| event == "15.0 enterprise/pre-jump")
        .expect("jump stage must run");
    assert_eq!(actions.events[jump + 1], "enterprise 15.0");
    assert_eq!(actions.events[jump + 2], "15.0 enterprise/post-jump");
    assert_eq!(
        actions.run_at[actions
            .run_at
            .iter()
            .position(|(name, _)| name == "15.0 enterprise/pre-jump")
            .expect("jump stage must be recorded")]
        .1,
        v("12.0")
    );
    assert_eq!(
        actions.events[actions.events.len() - 2..],
        ["16.0 enterprise/post-migration", "16.0 post-migration"]
    );

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn enterprise_without_jump_starts_above_the_minimum_target() {
    let dir = test_dir();
    let plan = MigrationPlan {
        enterprise_enabled: true,
        ..plan("14.0", "16.0")
    };
    let mut actions = FakeActions::open(&dir.join("progress.json"));

    migrate(plan, &mut actions).expect("migration must succeed");

    assert_eq!(actions.upgrades("enterprise "), vec!["16.0"]);
    assert_eq!(actions.upgrades("upgrade "), vec!["14.0", "15.0", "16.0"]);
    assert!(!actions.events.iter().any(|event| event.contains("jump")));
    assert!(actions
        .events
        .contains(&"14.0 enterprise/pre-migration".to_string()));

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn enterprise_only_migration_skips_openupgrade() {
    let dir = test_dir();
    let plan = MigrationPlan {
        enterprise_enabled: true,
        open_upgrade_disabled: true,
        skip_initial_upgrade: true,
        ..plan("15.0", "17.0")
    };
    let mut actions = FakeActions::open(&dir.join("progress.json"));

    migrate(plan, &mut actions).expect("migration must succeed");

    assert_eq!(actions.upgrades("enterprise "), vec!["16.0", "17.0"]);
    assert!(actions.upgrades("upgrade ").is_empty());
    assert!(!actions
        .events
        .iter()
        .any(|event| event.ends_with("pre-openupgrade")));

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn session_detects_jump_and_resume_point() {
    let dir = test_dir();
    let mut store = ProgressStore::open(dir.join("progress.json")).expect("must open progress");
    let jump_plan = MigrationPlan {
        enterprise_enabled: true,
        ..plan("12.0", "16.0")
    };

    let session = MigrationSession::new(jump_plan, &store);
    assert!(session.will_jump());
    assert!(session.from_start());
    assert_eq!(session.db_version(), v("12.0"));
    assert_eq!(session.ladder().len(), 5);

    store
        .mark_enterprise_done(v("15.0"))
        .expect("must mark enterprise");
    let session = MigrationSession::new(jump_plan, &store);
    assert!(!session.from_start());
    assert_eq!(session.progress_version(), v("15.0"));

    let _ = fs::remove_dir_all(dir);
}

fn env(pairs: &[(&str, &str)]) -> EnvSnapshot {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn base_env() -> EnvSnapshot {
    env(&[
        ("PGDATABASE", "acme"),
        ("ODOO_VERSION", "14.0"),
        ("WAFT_LOG_LEVEL", "INFO"),
        ("MIGRATION_START_VERSION", "12.0"),
    ])
}

#[test]
fn params_resolve_from_environment() {
    let cwd = Path::new("/srv/waft");
    let mut environment = base_env();
    environment.insert("MIGRATION_ENTERPRISE_ENABLED".into(), "True".into());
    environment.insert("MIGRATION_NO_BACKUPS".into(), "1".into());
    environment.insert("PGPASSWORD".into(), "secret".into());

    let params = resolve_params(&Cli::default(), &environment, cwd).expect("params must resolve");

    assert_eq!(params.root, cwd);
    assert_eq!(params.database, "acme");
    assert_eq!(params.start_version, v("12.0"));
    assert_eq!(params.target_version, v("14.0"));
    assert_eq!(params.enterprise_jump_to, v("15.0"));
    assert_eq!(params.pg_password.as_deref(), Some("secret"));
    assert!(params.enterprise_enabled);
    assert!(params.no_backups);
    assert!(!params.open_upgrade_disabled);
    assert!(!params.skip_initial_upgrade);
    assert_eq!(params.reset, None);
}

#[test]
fn command_line_overrides_environment() {
    let mut environment = base_env();
    environment.insert("WAFT_DIR".into(), "/opt/waft".into());
    let cli = Cli {
        database: Some("other".into()),
        start_version: Some("13.0".into()),
        open_upgrade_disabled: true,
        enterprise_jump_to: Some("16.0".into()),
        reset_progress: Some("13.0".into()),
        ..Cli::default()
    };

    let params =
        resolve_params(&cli, &environment, Path::new("/ignored")).expect("params must resolve");

    assert_eq!(params.root, PathBuf::from("/opt/waft"));
    assert_eq!(params.database, "other");
    assert_eq!(params.start_version, v("13.0"));
    assert_eq!(params.enterprise_jump_to, v("16.0"));
    assert!(params.open_upgrade_disabled);
    let reset = params.reset.expect("reset must be requested");
    assert_eq!(reset.version, v("13.0"));
    assert_eq!(reset.stage, Stage::PostUpgrade);
}

#[test]
fn missing_configuration_is_reported() {
    let cwd = Path::new("/srv/waft");
    for variable in ["PGDATABASE", "ODOO_VERSION", "WAFT_LOG_LEVEL"] {
        let mut environment = base_env();
        environment.remove(variable);
        let err = resolve_params(&Cli::default(), &environment, cwd)
            .expect_err("missing variable must fail");
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::MissingVariable(variable))
        );
    }

    let mut environment = base_env();
    environment.remove("MIGRATION_START_VERSION");
    let err = resolve_params(&Cli::default(), &environment, cwd)
        .expect_err("missing start version must fail");
    assert_eq!(
        err.downcast_ref::<ConfigError>(),
        Some(&ConfigError::MissingStartVersion)
    );

    let cli = Cli {
        start_version: Some("15.0".into()),
        ..Cli::default()
    };
    let err = resolve_params(&cli, &base_env(), cwd).expect_err("start past target must fail");
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::StartAfterTarget { .. })
    ));
}

#[cfg(unix)]
#[test]
fn working_root_is_resolved_through_symlinks() {
    let dir = test_dir();
    let real = dir.join("waft");
    fs::create_dir_all(&real).expect("must create root");
    let link = dir.join("current");
    std::os::unix::fs::symlink(&real, &link).expect("must create symlink");

    let through_link = canonical_root(&link).expect("must resolve link");
    let direct = canonical_root(&real).expect("must resolve root");
    assert_eq!(through_link, direct);
    assert!(canonical_root(&dir.join("missing")).is_err());

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn reset_requests_parse_stage_suffix() {
    let reset = parse_reset("14.0:enterprise/pre-upgrade").expect("reset must parse");
    assert_eq!(reset.version, v("14.0"));
    assert_eq!(reset.stage, Stage::EnterprisePreUpgrade);

    assert_eq!(
        parse_reset("14.0").expect("reset must parse").stage,
        Stage::PostUpgrade
    );
    assert!(parse_reset("14.0:post-jump").is_err());
    assert!(parse_reset("fourteen").is_err());
}

#[test]
fn env_flags_accept_common_spellings() {
    let environment = env(&[("A", "yes"), ("B", " TRUE "), ("C", "0"), ("D", "")]);
    assert!(env_flag(&environment, "A"));
    assert!(env_flag(&environment, "B"));
    assert!(!env_flag(&environment, "C"));
    assert!(!env_flag(&environment, "D"));
    assert!(!env_flag(&environment, "MISSING"));
}

#[test]
fn cli_parses_short_flags() {
    let cli = Cli::try_parse_from([
        "waft-migrate",
        "-d",
        "acme",
        "-e",
        "-f",
        "12.0",
        "--reset-progress",
        "13.0:pre-upgrade",
        "--enterprise-dont-resume",
    ])
    .expect("arguments must parse");

    assert_eq!(cli.database.as_deref(), Some("acme"));
    assert!(cli.enterprise_enabled);
    assert_eq!(cli.start_version.as_deref(), Some("12.0"));
    assert_eq!(cli.reset_progress.as_deref(), Some("13.0:pre-upgrade"));
    assert!(cli.enterprise_dont_resume);
    assert!(!cli.rebuild);
}

#[test]
fn cli_errors_go_to_stderr_but_help_does_not() {
    let err = Cli::try_parse_from(["waft-migrate", "--bogus"]).expect_err("must reject flag");
    assert!(err.use_stderr());

    let err = Cli::try_parse_from(["waft-migrate", "--help"]).expect_err("help must short-circuit");
    assert!(!err.use_stderr());
}

#[test]
fn log_levels_follow_python_names() {
    assert_eq!(
        level_filter("warning", false).expect("must map"),
        LevelFilter::WARN
    );
    assert_eq!(
        level_filter("CRITICAL", false).expect("must map"),
        LevelFilter::ERROR
    );
    assert_eq!(
        level_filter("ERROR", true).expect("must map"),
        LevelFilter::DEBUG
    );
    assert!(level_filter("LOUD", false).is_err());
}

#[test]
fn status_lines_render_plain_and_rich() {
    assert_eq!(resolve_output_style(false), OutputStyle::Plain);
    assert_eq!(resolve_output_style(true), OutputStyle::Rich);
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "migration completed"),
        "[OK] migration completed"
    );

    let rich = render_status_line(OutputStyle::Rich, "fail", "boom");
    assert!(rich.contains("[FAIL]"));
    assert!(rich.contains('\u{1b}'));
    assert!(rich.ends_with(" boom"));
}

#[test]
fn upgrade_arguments_depend_on_baseline_and_verbosity() {
    assert_eq!(upgrade_args(true, false), vec!["-u", "base"]);
    assert_eq!(
        upgrade_args(false, false),
        vec!["-u", "base", "--load=openupgrade_framework"]
    );

    let verbose = upgrade_args(false, true);
    assert!(verbose.contains(&"--log-level=debug_sql"));
    assert!(verbose.contains(&"--log-handler=odoo.modules.migration:DEBUG"));
    assert!(!upgrade_args(true, true).contains(&"--log-handler=odoo.modules.migration:DEBUG"));
}

fn params_for_rebuild() -> MigrationParams {
    resolve_params(&Cli::default(), &base_env(), Path::new("/srv/waft"))
        .expect("params must resolve")
}

#[test]
fn env_secret_rewrites_known_keys_and_appends_missing() {
    let params = params_for_rebuild();
    let overrides = env_secret_overrides(&params, v("13.0"));
    let template = "# secrets\nODOO_VERSION=12.0\n  CUSTOM = keep  \nPGPORT=\n";

    let rewritten = rewrite_env_secret(template, &overrides);

    assert_eq!(
        rewritten,
        "ODOO_VERSION=\"13.0\"\n\
         CUSTOM = keep\n\
         PGPORT=\"5432\"\n\
         PGDATABASE=\"acme\"\n\
         ODOO_DBFILTER=\"^acme$\"\n\
         LOG_LEVEL=\"DEBUG\"\n\
         DEFAULT_REPO_PATTERN_ODOO=\"https://github.com/OCA/OpenUpgrade.git\"\n"
    );
}

#[test]
fn env_secret_points_start_and_modern_builds_at_their_own_sources() {
    let params = params_for_rebuild();
    let has_pattern = |version: &str| {
        env_secret_overrides(&params, v(version))
            .iter()
            .any(|(name, _)| *name == "DEFAULT_REPO_PATTERN_ODOO")
    };
    assert!(!has_pattern("12.0"));
    assert!(has_pattern("13.0"));
    assert!(!has_pattern("14.0"));

    let enterprise = MigrationParams {
        enterprise_enabled: true,
        ..params_for_rebuild()
    };
    let overrides = env_secret_overrides(&enterprise, v("12.0"));
    assert!(overrides.contains(&(
        "DEFAULT_REPO_PATTERN_ODOO",
        "https://github.com/odoo/odoo.git".to_string()
    )));
}

fn yaml(raw: &str) -> Mapping {
    serde_yaml::from_str(raw).expect("yaml must parse")
}

fn entry<'a>(config: &'a Mapping, name: &str) -> &'a Value {
    config.get(name).expect("repository entry must exist")
}

#[test]
fn odoo_entry_uses_openupgrade_before_14() {
    let mut config = yaml("web:\n  remotes:\n    oca: https://github.com/OCA/web\n");

    prepare_odoo_entry(&mut config, v("13.0"), false);

    let odoo = entry(&config, "odoo");
    assert_eq!(
        odoo["remotes"]["oca"].as_str(),
        Some("https://github.com/OCA/OpenUpgrade")
    );
    assert_eq!(odoo["merges"][0].as_str(), Some("oca ${ODOO_VERSION}"));
    assert!(!config.contains_key("openupgrade"));
}

#[test]
fn odoo_entry_folds_ocb_fork_remotes_from_14() {
    let mut config = yaml(
        "ocb:\n  defaults:\n    depth: 200\n  remotes:\n    oca: https://github.com/OCA/OCB.git\n    acme: https://github.com/acme/OCB\n  merges:\n    - oca 14.0\n    - acme 14.0-fixes\n",
    );

    prepare_odoo_entry(&mut config, v("14.0"), false);

    assert!(!config.contains_key("ocb"));
    let odoo = entry(&config, "odoo");
    assert_eq!(
        odoo["remotes"]["oca"].as_str(),
        Some("https://github.com/OCA/OCB")
    );
    assert_eq!(
        odoo["remotes"]["acme"].as_str(),
        Some("https://github.com/acme/OCB")
    );
    let merges = odoo["merges"].as_sequence().expect("merges must be a list");
    assert_eq!(merges.len(), 2);
    assert_eq!(merges[1].as_str(), Some("acme 14.0-fixes"));
    assert_eq!(odoo["defaults"]["depth"].as_u64(), Some(200));
    assert_eq!(
        entry(&config, "openupgrade")["remotes"]["oca"].as_str(),
        Some("https://github.com/OCA/OpenUpgrade")
    );
}

#[test]
fn odoo_entry_uses_enterprise_sources() {
    let mut config = Mapping::new();
    prepare_odoo_entry(&mut config, v("16.0"), true);

    assert_eq!(
        entry(&config, "odoo")["remotes"]["odoo"].as_str(),
        Some("https://github.com/odoo/odoo")
    );
    assert_eq!(
        entry(&config, "odoo")["merges"][0].as_str(),
        Some("odoo ${ODOO_VERSION}")
    );
    assert!(!config.contains_key("openupgrade"));
}

#[test]
fn repos_are_limited_to_the_original_set() {
    let old = yaml("odoo: {}\nweb: {}\n");
    let whitelist = repo_whitelist(Some(&old));
    assert_eq!(whitelist, vec!["odoo", "web", "openupgrade"]);
    assert_eq!(repo_whitelist(None), vec!["openupgrade"]);

    let defaults = yaml("odoo: {}\nweb: {}\nsocial: {}\n");
    let template = yaml("web:\n  target: custom\n");
    let merged = merge_repo_configs(&defaults, Some(&template));
    assert_eq!(entry(&merged, "web")["target"].as_str(), Some("custom"));

    let limited = exclude_repos(&merged, &whitelist);
    let names = limited
        .keys()
        .filter_map(Value::as_str)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["odoo", "web"]);
}

#[test]
fn odoo_conf_is_pointed_at_migration_log_and_scripts() {
    let build = Path::new("/srv/waft/build-14.0");
    let logfile = Path::new("/srv/waft/logfile/acme-14.0.log");
    let conf = "[options]\nlogfile = /var/log/odoo.log\nupgrade_path = /old\ndb_port = 6543\n";

    let rewritten = rewrite_odoo_conf(conf, build, logfile, v("14.0"), v("12.0"));

    assert_eq!(
        rewritten,
        "[options]\n\
         db_port = 6543\n\
         logfile = /srv/waft/logfile/acme-14.0.log\n\
         upgrade_path = /srv/waft/build-14.0/custom/src/openupgrade/openupgrade_scripts/scripts\n\
         server_wide_modules = openupgrade_framework\n"
    );
}

#[test]
fn odoo_conf_for_old_releases_pins_port_and_dev_mode() {
    let build = Path::new("/srv/waft/build-8.0");
    let logfile = Path::new("/srv/waft/logfile/acme-8.0.log");
    let conf = "[options]\ndb_port = False\n";

    let rewritten = rewrite_odoo_conf(conf, build, logfile, v("8.0"), v("8.0"));

    assert_eq!(
        rewritten,
        "[options]\n\
         logfile = /srv/waft/logfile/acme-8.0.log\n\
         db_port = 5432\n\
         running_env = dev\n"
    );
}
