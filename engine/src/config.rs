//! `~/.warden/config.toml` loading.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use warden_tools::ApprovalMode;
use warden_tools::config::{DynamicToolConfig, ShellConfig, default_true};

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "WARDEN_CONFIG";

pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TOOL_FILE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TOOL_SHELL_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_TOOL_OUTPUT_BYTES: usize = 102_400;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Top-level configuration.
///
/// Every section is optional; a missing file means defaults everywhere.
///
/// ```toml
/// max_iterations_per_turn = 25
///
/// [sandbox]
/// allowed_roots = ["${HOME}/scratch"]
///
/// [approval]
/// mode = "strict"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct WardenConfig {
    pub max_iterations_per_turn: Option<u32>,
    pub sandbox: Option<SandboxConfig>,
    pub timeouts: Option<TimeoutsConfig>,
    pub output: Option<OutputConfig>,
    pub approval: Option<ApprovalConfig>,
    pub command_safety: Option<CommandSafetyConfig>,
    pub environment: Option<EnvironmentConfig>,
    pub shell: Option<ShellConfig>,
    pub script: Option<ScriptConfig>,
    pub dynamic: Option<DynamicToolConfig>,
}

/// Directories tools may touch, beyond the working directory.
#[derive(Debug, Default, Deserialize)]
pub struct SandboxConfig {
    /// `${VAR}` and a leading `~` are expanded.
    #[serde(default)]
    pub allowed_roots: Vec<String>,
    #[serde(default)]
    pub denied_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub include_default_denies: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimeoutsConfig {
    pub default_seconds: Option<u64>,
    pub file_operations_seconds: Option<u64>,
    pub shell_commands_seconds: Option<u64>,
    pub script_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputConfig {
    pub max_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApprovalConfig {
    /// `permissive`, `default` or `strict`.
    pub mode: Option<String>,
}

impl ApprovalConfig {
    #[must_use]
    pub fn approval_mode(&self) -> ApprovalMode {
        parse_approval_mode(self.mode.as_deref())
    }
}

/// Extra command blacklist entries.
///
/// ```toml
/// [[command_safety.patterns]]
/// pattern = '(?i)\bterraform\s+destroy\b'
/// reason = "terraform destroy"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct CommandSafetyConfig {
    #[serde(default)]
    pub patterns: Vec<CommandPatternConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandPatternConfig {
    pub pattern: String,
    pub reason: String,
}

impl CommandSafetyConfig {
    #[must_use]
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.patterns
            .iter()
            .map(|p| (p.pattern.clone(), p.reason.clone()))
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EnvironmentConfig {
    /// Added to the built-in denylist.
    #[serde(default)]
    pub denylist: Vec<String>,
    /// Replaces the default allow-list for script runs when set.
    pub script_allowlist: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScriptConfig {
    /// `deno`, `node` or `python`. Detected from `PATH` when unset.
    pub runtime: Option<String>,
}

fn parse_approval_mode(raw: Option<&str>) -> ApprovalMode {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("permissive" | "auto") => ApprovalMode::Permissive,
        Some("strict") => ApprovalMode::Strict,
        // "default", "prompt", or anything else
        _ => ApprovalMode::Default,
    }
}

/// Replace `${VAR}` references with the variable's value (empty when unset).
///
/// An unterminated `${` is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Expand `${VAR}` references and a leading `~` in a configured path.
#[must_use]
pub fn expand_path(raw: &str) -> PathBuf {
    let expanded = expand_env_vars(raw);
    if expanded == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = expanded.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(expanded)
}

impl WardenConfig {
    /// Load from [`config_path`]. `Ok(None)` when there is no config file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    #[must_use]
    pub fn approval_mode(&self) -> ApprovalMode {
        self.approval
            .as_ref()
            .map(ApprovalConfig::approval_mode)
            .unwrap_or_default()
    }
}

/// `$WARDEN_CONFIG` if set, else `~/.warden/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    if let Some(raw) = env::var_os(CONFIG_PATH_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(raw));
    }
    dirs::home_dir().map(|home| home.join(".warden").join("config.toml"))
}
