//! Configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::exec::{ExecOptions, SandboxMode};

/// Defaults applied to every `codex exec` invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecDefaults {
    /// Model to use unless overridden.
    pub model: Option<String>,
    /// Sandbox mode to use unless overridden.
    pub sandbox: Option<SandboxMode>,
    /// Allow running outside a git repository.
    pub skip_git_repo_check: bool,
    /// Run without approval prompts.
    pub full_auto: bool,
    /// `-c key=value` overrides passed to every run.
    pub config_overrides: BTreeMap<String, String>,
    /// Extra environment variables for the child.
    pub env: BTreeMap<String, String>,
}

impl ExecDefaults {
    /// Build options for `prompt` seeded with these defaults.
    #[must_use]
    pub fn options(&self, prompt: impl Into<String>) -> ExecOptions {
        let mut options = ExecOptions::new(prompt)
            .skip_git_repo_check(self.skip_git_repo_check)
            .full_auto(self.full_auto);

        if let Some(model) = &self.model {
            options = options.model(model.clone());
        }
        if let Some(mode) = self.sandbox {
            options = options.sandbox(mode);
        }
        for (key, value) in &self.config_overrides {
            options = options.config_override(key.clone(), value.clone());
        }
        for (key, value) in &self.env {
            options = options.env(key.clone(), value.clone());
        }
        options
    }
}

/// Configuration for the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Codex binary; a bare name is looked up on `PATH`.
    pub binary: PathBuf,
    /// Milliseconds between SIGTERM and SIGKILL when a run is cancelled.
    pub terminate_timeout_ms: u64,
    /// Per-run defaults.
    pub defaults: ExecDefaults,
}

fn default_binary() -> PathBuf {
    PathBuf::from("codex")
}

fn default_terminate_timeout_ms() -> u64 {
    5000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            terminate_timeout_ms: default_terminate_timeout_ms(),
            defaults: ExecDefaults::default(),
        }
    }
}

impl BridgeConfig {
    /// Grace period for cancelled runs.
    #[must_use]
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }
}
