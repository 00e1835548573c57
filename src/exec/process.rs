//! Codex process spawning and control.
//!
//! This module provides a builder for the `codex exec` launch arguments and a
//! thin wrapper around the spawned child with termination helpers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use super::error::SpawnError;

/// Sandbox policy for commands the agent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

impl SandboxMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::WorkspaceWrite => "workspace-write",
            Self::DangerFullAccess => "danger-full-access",
        }
    }
}

/// Options for one `codex exec` invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    prompt: String,
    model: Option<String>,
    sandbox: Option<SandboxMode>,
    working_dir: Option<PathBuf>,
    skip_git_repo_check: bool,
    full_auto: bool,
    images: Vec<PathBuf>,
    config_overrides: BTreeMap<String, String>,
    env: BTreeMap<String, String>,
}

impl ExecOptions {
    /// Create options for the given prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the sandbox mode.
    #[must_use]
    pub fn sandbox(mut self, mode: SandboxMode) -> Self {
        self.sandbox = Some(mode);
        self
    }

    /// Set the working directory the agent operates in.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Allow running outside a git repository.
    #[must_use]
    pub fn skip_git_repo_check(mut self, skip: bool) -> Self {
        self.skip_git_repo_check = skip;
        self
    }

    /// Run without approval prompts in a workspace-write sandbox.
    #[must_use]
    pub fn full_auto(mut self, enabled: bool) -> Self {
        self.full_auto = enabled;
        self
    }

    /// Attach an image to the prompt.
    #[must_use]
    pub fn image(mut self, path: impl Into<PathBuf>) -> Self {
        self.images.push(path.into());
        self
    }

    /// Override a configuration value (`-c key=value`).
    #[must_use]
    pub fn config_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config_overrides.insert(key.into(), value.into());
        self
    }

    /// Set an extra environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Get the prompt.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Get the extra environment variables.
    #[must_use]
    pub fn get_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "--json".to_string()];

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if let Some(mode) = self.sandbox {
            args.push("--sandbox".to_string());
            args.push(mode.as_str().to_string());
        }

        if let Some(dir) = &self.working_dir {
            args.push("--cd".to_string());
            args.push(dir.display().to_string());
        }

        if self.skip_git_repo_check {
            args.push("--skip-git-repo-check".to_string());
        }

        if self.full_auto {
            args.push("--full-auto".to_string());
        }

        for image in &self.images {
            args.push("--image".to_string());
            args.push(image.display().to_string());
        }

        for (key, value) in &self.config_overrides {
            args.push("-c".to_string());
            args.push(format!("{key}={value}"));
        }

        // Everything after `--` is the prompt, even if it starts with a dash.
        args.push("--".to_string());
        args.push(self.prompt.clone());

        args
    }
}

/// A running Codex process.
#[derive(Debug)]
pub struct CodexProcess {
    child: Child,
}

impl CodexProcess {
    /// Spawn `binary` with the arguments built from `options`.
    ///
    /// Stdin is closed, stdout and stderr are captured, and the caller's
    /// environment is inherited with `options`' extra variables on top.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(binary: &Path, options: &ExecOptions) -> Result<Self, SpawnError> {
        Self::spawn_with_args(binary, &options.build_args(), options.get_env())
    }

    /// Spawn `program` with explicit arguments.
    ///
    /// Used for custom launchers and for tests that stand in a script for
    /// the real binary.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn_with_args(
        program: &Path,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self, SpawnError> {
        let program_name = program.display().to_string();

        tracing::info!(program = %program_name, ?args, "Spawning Codex process");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| SpawnError::from_io(&program_name, e))?;

        tracing::debug!(pid = ?child.id(), "Codex process started");
        Ok(Self { child })
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Forcefully kill the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    /// Start killing the process without waiting for it to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub fn start_kill(&mut self) -> std::io::Result<()> {
        self.child.start_kill()
    }

    /// Ask the process to stop without waiting for it.
    ///
    /// On Unix, sends SIGTERM. On other platforms, starts a kill.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be sent.
    pub fn terminate(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let Some(pid) = self.id() else {
                // Process already exited
                return Ok(());
            };
            let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            kill(nix_pid, Signal::SIGTERM).map_err(std::io::Error::from)
        }

        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// Sends [`terminate`](Self::terminate), then kills the process if it is
    /// still running after the timeout. The exit status is left for
    /// [`wait`](Self::wait) to collect. Nothing reads the child's pipes
    /// meanwhile; callers that must keep draining stdout drive
    /// `terminate` and `start_kill` themselves.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, timeout: Duration) -> std::io::Result<()> {
        if let Err(e) = self.terminate() {
            tracing::debug!(pid = ?self.id(), error = %e, "SIGTERM failed");
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(pid = ?self.id(), ?timeout, "Codex ignored SIGTERM, killing");
                self.child.start_kill()
            }
        }
    }
}
