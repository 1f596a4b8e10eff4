use std::io::{BufRead, BufReader, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, error};

const STDERR_POLL_INTERVAL: Duration = Duration::from_secs(1);
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(100);

/// A child process exited unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("the following command failed with exit code {exit_code}: {command}")]
pub struct CommandFailed {
    pub command: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions<'a> {
    /// Text written to the child's stdin, followed by a newline, before stdin
    /// is closed.
    pub input: Option<&'a str>,
    /// Neither log captured lines nor replay them on failure.
    pub quiet: bool,
}

impl<'a> RunOptions<'a> {
    pub fn with_input(input: &'a str) -> Self {
        Self {
            input: Some(input),
            quiet: false,
        }
    }

    pub fn quiet() -> Self {
        Self {
            input: None,
            quiet: true,
        }
    }
}

pub fn shell_command(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(line);
    command
}

pub fn describe_command(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(
        command
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned()),
    );
    parts.join(" ")
}

/// Returns the [`CommandFailed`] carried by `err`, if any.
pub fn command_failure(err: &anyhow::Error) -> Option<&CommandFailed> {
    err.downcast_ref::<CommandFailed>()
}

/// Runs `command` to completion, capturing both output streams.
///
/// Stderr is drained by a dedicated reader thread while this thread consumes
/// stdout, so a child filling both pipes cannot wedge the migration.
pub fn run_command(command: &mut Command, options: RunOptions<'_>) -> Result<CommandOutput> {
    let shown = describe_command(command);
    debug!("{shown}");

    command
        .stdin(if options.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command
        .spawn()
        .with_context(|| format!("failed launching {shown}"))?;

    let writer = match (options.input, child.stdin.take()) {
        (Some(input), Some(mut stdin)) => {
            let mut payload = input.to_string();
            if !payload.ends_with('\n') {
                payload.push('\n');
            }
            Some(thread::spawn(move || {
                let _ = stdin.write_all(payload.as_bytes());
            }))
        }
        _ => None,
    };

    let stderr = child
        .stderr
        .take()
        .with_context(|| format!("stderr of {shown} was not captured"))?;
    let (sender, receiver) = mpsc::channel::<String>();
    thread::spawn(move || {
        for line in BufReader::new(stderr).lines() {
            let Ok(line) = line else {
                break;
            };
            if sender.send(line).is_err() {
                break;
            }
        }
    });

    let mut stdout_lines = Vec::new();
    let mut stderr_lines = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            let line = line.with_context(|| format!("failed reading stdout of {shown}"))?;
            drain_ready(&receiver, &mut stderr_lines, options.quiet);
            if !options.quiet {
                debug!("[stdout]: {line}");
            }
            stdout_lines.push(line);
        }
    }

    let status = wait_polling_stderr(&mut child, &receiver, &mut stderr_lines, options.quiet)
        .with_context(|| format!("failed waiting for {shown}"))?;
    while let Ok(line) = receiver.recv_timeout(STDERR_DRAIN_GRACE) {
        record_stderr(line, &mut stderr_lines, options.quiet);
    }
    if let Some(writer) = writer {
        let _ = writer.join();
    }

    let output = CommandOutput {
        stdout: join_lines(&stdout_lines),
        stderr: join_lines(&stderr_lines),
    };
    if status.success() {
        return Ok(output);
    }

    if !options.quiet {
        if !stderr_lines.is_empty() {
            error!("{}", prefixed(&stderr_lines, "[stderr]: "));
        }
        if !stdout_lines.is_empty() {
            error!("{}", prefixed(&stdout_lines, "[stdout]: "));
        }
    }
    Err(CommandFailed {
        command: shown,
        exit_code: status.code().unwrap_or(-1),
    }
    .into())
}

/// Runs a shell line with the terminal attached, like `system(3)`.
pub fn run_system(line: &str) -> Result<()> {
    run_attached(&mut shell_command(line))
}

/// Runs `command` with this process' stdio, for long builds whose output the
/// operator should see as it happens.
pub fn run_attached(command: &mut Command) -> Result<()> {
    let shown = describe_command(command);
    debug!("{shown}");
    let status = command
        .status()
        .with_context(|| format!("failed to start: {shown}"))?;
    if !status.success() {
        return Err(CommandFailed {
            command: shown,
            exit_code: status.code().unwrap_or(-1),
        }
        .into());
    }
    Ok(())
}

fn wait_polling_stderr(
    child: &mut std::process::Child,
    receiver: &Receiver<String>,
    stderr_lines: &mut Vec<String>,
    quiet: bool,
) -> std::io::Result<ExitStatus> {
    loop {
        match receiver.recv_timeout(STDERR_POLL_INTERVAL) {
            Ok(line) => record_stderr(line, stderr_lines, quiet),
            Err(RecvTimeoutError::Timeout) => {
                if let Some(status) = child.try_wait()? {
                    return Ok(status);
                }
            }
            Err(RecvTimeoutError::Disconnected) => return child.wait(),
        }
    }
}

fn drain_ready(receiver: &Receiver<String>, stderr_lines: &mut Vec<String>, quiet: bool) {
    while let Ok(line) = receiver.try_recv() {
        record_stderr(line, stderr_lines, quiet);
    }
}

fn record_stderr(line: String, stderr_lines: &mut Vec<String>, quiet: bool) {
    if !quiet {
        debug!("[stderr]: {line}");
    }
    stderr_lines.push(line);
}

fn join_lines(lines: &[String]) -> String {
    let mut joined = lines.join("\n");
    if !joined.is_empty() {
        joined.push('\n');
    }
    joined
}

fn prefixed(lines: &[String], prefix: &str) -> String {
    lines
        .iter()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
