//! External command execution for starting and stopping services
//!
//! The manager never owns the server processes it launches. It runs a
//! short-lived `bash` invocation with a bounded wait and later re-discovers
//! the result through the process probe.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// A bounded invocation of an external program
#[derive(Debug, Clone, PartialEq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl ShellCommand {
    /// `bash <script>`
    pub fn script(path: &Path, timeout: Duration) -> Self {
        Self {
            program: "bash".to_string(),
            args: vec![path.to_string_lossy().into_owned()],
            env: Vec::new(),
            timeout,
        }
    }

    /// `bash -c <script> <name> <args...>`; `args` become `$1..$n`
    pub fn inline(script: String, name: &str, args: Vec<String>, timeout: Duration) -> Self {
        let mut all_args = vec!["-c".to_string(), script, name.to_string()];
        all_args.extend(args);
        Self {
            program: "bash".to_string(),
            args: all_args,
            env: Vec::new(),
            timeout,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Captured result of a command that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// Gave up waiting; the command itself may still be running
    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Trait for running start/stop mechanisms
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Run a command, waiting at most `command.timeout`
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutput, CommandError>;

    /// Ask a process to exit (SIGTERM). Returns Ok if it is already gone
    async fn terminate(&self, pid: u32) -> Result<()>;
}

/// Production launcher using tokio::process
#[derive(Debug, Default)]
pub struct ShellLauncher;

impl ShellLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Launcher for ShellLauncher {
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A timeout stops the wait, not the command
            .kill_on_drop(false);

        let child = cmd.spawn().map_err(CommandError::Spawn)?;
        let pid = child.id();

        tracing::debug!(program = %command.program, pid = ?pid, "Command spawned");

        match tokio::time::timeout(command.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code(),
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(CommandError::Spawn(e)),
            Err(_) => {
                tracing::warn!(
                    program = %command.program,
                    pid = ?pid,
                    timeout_secs = command.timeout.as_secs(),
                    "Command did not finish in time, leaving it running"
                );
                Err(CommandError::TimedOut(command.timeout))
            }
        }
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            let raw = i32::try_from(pid).with_context(|| format!("PID {pid} out of range"))?;
            match kill(Pid::from_raw(raw), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(e) => Err(e).with_context(|| format!("Failed to signal process {pid}")),
            }
        }

        #[cfg(not(unix))]
        {
            anyhow::bail!("Cannot signal process {pid} on this platform")
        }
    }
}
