use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};
use waft_migrate_core::Version;

const STDERR_SETTLE: Duration = Duration::from_secs(1);

/// How an upgrade process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// `-1` when the process was terminated by a signal.
    pub code: i32,
    /// Last non-empty stderr line.
    pub stderr_tail: Option<String>,
}

/// One running attempt of the enterprise upgrade tool.
pub trait UpgradeProcess {
    fn try_exit(&mut self) -> Result<Option<ProcessExit>>;
    fn answer(&mut self, response: &str) -> Result<()>;
    fn kill(&mut self);
}

pub trait UpgradeLauncher {
    type Process: UpgradeProcess;

    fn launch(&mut self, version: Version, attempt: u32) -> Result<Self::Process>;
}

/// Starts the downloaded upgrade script with `python3`.
#[derive(Debug, Clone)]
pub struct ScriptLauncher {
    script: PathBuf,
    database: String,
    production: bool,
}

impl ScriptLauncher {
    pub fn new(script: impl Into<PathBuf>, database: impl Into<String>, production: bool) -> Self {
        Self {
            script: script.into(),
            database: database.into(),
            production,
        }
    }

    pub fn mode(&self) -> &'static str {
        if self.production {
            "production"
        } else {
            "test"
        }
    }
}

impl UpgradeLauncher for ScriptLauncher {
    type Process = ChildUpgradeProcess;

    fn launch(&mut self, version: Version, attempt: u32) -> Result<Self::Process> {
        info!("Starting enterprise upgrade to {version} (attempt {attempt})...");
        let mut command = Command::new("python3");
        command
            .arg(&self.script)
            .arg("--debug")
            .arg(self.mode())
            .arg("-d")
            .arg(&self.database)
            .arg("-t")
            .arg(version.to_string());
        ChildUpgradeProcess::spawn(command)
    }
}

/// Child process with a piped stdin for prompt answers and a background
/// reader keeping the last stderr line.
pub struct ChildUpgradeProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_tail: Arc<Mutex<Option<String>>>,
    stderr_reader: Option<JoinHandle<()>>,
}

impl ChildUpgradeProcess {
    pub fn spawn(mut command: Command) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to start enterprise upgrade tool")?;

        let stdin = child.stdin.take();
        let stderr_tail = Arc::new(Mutex::new(None));
        let stderr_reader = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&stderr_tail);
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    info!("{line}");
                    if !line.trim().is_empty() {
                        if let Ok(mut slot) = tail.lock() {
                            *slot = Some(line);
                        }
                    }
                }
            })
        });

        Ok(Self {
            child,
            stdin,
            stderr_tail,
            stderr_reader,
        })
    }

    fn settle_stderr(&mut self) {
        let Some(reader) = self.stderr_reader.take() else {
            return;
        };
        // Helpers spawned by the tool may keep stderr open past its exit.
        let deadline = Instant::now() + STDERR_SETTLE;
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        if reader.is_finished() {
            let _ = reader.join();
        }
    }

    fn last_stderr_line(&self) -> Option<String> {
        self.stderr_tail.lock().ok().and_then(|slot| slot.clone())
    }
}

impl UpgradeProcess for ChildUpgradeProcess {
    fn try_exit(&mut self) -> Result<Option<ProcessExit>> {
        let Some(status) = self
            .child
            .try_wait()
            .context("failed to poll enterprise upgrade tool")?
        else {
            return Ok(None);
        };
        self.settle_stderr();
        Ok(Some(ProcessExit {
            code: status.code().unwrap_or(-1),
            stderr_tail: self.last_stderr_line(),
        }))
    }

    fn answer(&mut self, response: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .context("enterprise upgrade tool has no stdin")?;
        stdin
            .write_all(format!("{response}\n").as_bytes())
            .and_then(|_| stdin.flush())
            .context("failed to answer enterprise upgrade prompt")
    }

    fn kill(&mut self) {
        self.stdin.take();
        if let Err(err) = self.child.kill() {
            if err.kind() != std::io::ErrorKind::InvalidInput {
                warn!("failed to stop enterprise upgrade tool: {err}");
            }
        }
        let _ = self.child.wait();
    }
}
