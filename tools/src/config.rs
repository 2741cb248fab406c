//! Configuration types consumed by tool executors.
//!
//! The engine deserializes these straight out of `config.toml`, so they live
//! here rather than in the engine to keep the dependency pointing one way.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Serde helper for fields that default to `true`.
#[must_use]
pub const fn default_true() -> bool {
    true
}

/// Shell configuration for command execution.
///
/// ```toml
/// [shell]
/// binary = "bash"
/// args = ["-c"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShellConfig {
    /// Override shell binary (e.g., "bash", "/usr/local/bin/zsh").
    pub binary: Option<String>,
    /// Override shell args (e.g., `["-c"]`).
    pub args: Option<Vec<String>>,
}

pub const DEFAULT_DESCRIBE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_DYNAMIC_TOOLS: usize = 64;
pub const DEFAULT_DYNAMIC_OUTPUT_BYTES: usize = 64 * 1024;

const fn default_describe_timeout_secs() -> u64 {
    DEFAULT_DESCRIBE_TIMEOUT_SECS
}

const fn default_max_tools() -> usize {
    DEFAULT_MAX_DYNAMIC_TOOLS
}

const fn default_dynamic_output_bytes() -> usize {
    DEFAULT_DYNAMIC_OUTPUT_BYTES
}

/// Dynamic tool discovery settings.
///
/// ```toml
/// [dynamic]
/// enabled = true
/// user_dir = "~/.warden/tools"
/// max_tools = 32
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicToolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Defaults to `~/.warden/tools`.
    pub user_dir: Option<PathBuf>,
    /// Defaults to `<primary root>/.warden/tools`.
    pub project_dir: Option<PathBuf>,
    #[serde(default = "default_max_tools")]
    pub max_tools: usize,
    #[serde(default = "default_describe_timeout_secs")]
    pub describe_timeout_secs: u64,
    #[serde(default = "default_dynamic_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for DynamicToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            user_dir: None,
            project_dir: None,
            max_tools: DEFAULT_MAX_DYNAMIC_TOOLS,
            describe_timeout_secs: DEFAULT_DESCRIBE_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_DYNAMIC_OUTPUT_BYTES,
        }
    }
}

impl DynamicToolConfig {
    #[must_use]
    pub fn describe_timeout(&self) -> Duration {
        Duration::from_secs(self.describe_timeout_secs)
    }

    /// User-level tool directory, falling back to `~/.warden/tools`.
    #[must_use]
    pub fn resolved_user_dir(&self) -> Option<PathBuf> {
        self.user_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".warden").join("tools")))
    }

    /// Project-level tool directory under `project_root` unless overridden.
    #[must_use]
    pub fn resolved_project_dir(&self, project_root: &std::path::Path) -> PathBuf {
        self.project_dir
            .clone()
            .unwrap_or_else(|| project_root.join(".warden").join("tools"))
    }
}
