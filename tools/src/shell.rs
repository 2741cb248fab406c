//! Shell detection for the `Run` tool.

use std::path::{Path, PathBuf};

use crate::config::ShellConfig;
use crate::executor::{EnvMode, ProcessSpec};

/// Detected shell for command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedShell {
    /// Path or name of the shell binary.
    pub binary: PathBuf,
    /// Arguments to pass before the command (e.g., `["-c"]`).
    pub args: Vec<String>,
    /// Human-readable name for logging.
    pub name: String,
}

impl std::fmt::Display for DetectedShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl DetectedShell {
    /// Process spec running `command` through this shell with a sanitized environment.
    #[must_use]
    pub fn command_spec(&self, command: &str) -> ProcessSpec {
        let mut args = self.args.clone();
        args.push(command.to_string());
        ProcessSpec::new(self.binary.clone(), args, EnvMode::Sanitized)
    }
}

/// Detect the shell: config override first, then `$SHELL`, `bash`, `/bin/sh`.
#[must_use]
pub fn detect_shell(config: Option<&ShellConfig>) -> DetectedShell {
    if let Some(cfg) = config
        && let Some(binary) = &cfg.binary
    {
        let args = cfg.args.clone().unwrap_or_else(|| default_args_for(binary));
        return DetectedShell {
            binary: PathBuf::from(binary),
            args,
            name: "configured".into(),
        };
    }

    detect_platform_shell()
}

/// Infer default args for a shell binary name.
fn default_args_for(binary: &str) -> Vec<String> {
    let name = Path::new(binary)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(binary)
        .to_lowercase();

    match name.as_str() {
        "cmd" => vec!["/C".to_string()],
        "pwsh" | "powershell" => vec!["-NoProfile".to_string(), "-Command".to_string()],
        _ => vec!["-c".to_string()],
    }
}

#[cfg(windows)]
fn detect_platform_shell() -> DetectedShell {
    if let Ok(path) = which::which("pwsh") {
        return DetectedShell {
            binary: path,
            args: default_args_for("pwsh"),
            name: "pwsh".into(),
        };
    }
    let comspec = std::env::var("ComSpec")
        .map_or_else(|_| PathBuf::from(r"C:\Windows\System32\cmd.exe"), PathBuf::from);
    DetectedShell {
        binary: comspec,
        args: default_args_for("cmd"),
        name: "cmd".into(),
    }
}

#[cfg(not(windows))]
fn detect_platform_shell() -> DetectedShell {
    if let Ok(shell) = std::env::var("SHELL") {
        let path = Path::new(&shell);
        if path.exists() {
            let name = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("user-shell")
                .to_string();
            return DetectedShell {
                binary: PathBuf::from(&shell),
                args: vec!["-c".to_string()],
                name,
            };
        }
    }

    if let Ok(path) = which::which("bash") {
        return DetectedShell {
            binary: path,
            args: vec!["-c".to_string()],
            name: "bash".into(),
        };
    }

    DetectedShell {
        binary: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string()],
        name: "sh".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::{PathBuf, ShellConfig, default_args_for, detect_shell};
    use crate::executor::EnvMode;

    #[test]
    fn default_args_for_known_shells() {
        assert_eq!(default_args_for("/bin/bash"), vec!["-c"]);
        assert_eq!(default_args_for("/usr/local/bin/fish"), vec!["-c"]);
        assert_eq!(default_args_for("pwsh"), vec!["-NoProfile", "-Command"]);
        assert_eq!(default_args_for("cmd.exe"), vec!["/C"]);
    }

    #[test]
    fn config_override_wins() {
        let config = ShellConfig {
            binary: Some("zsh".to_string()),
            args: Some(vec!["-fc".to_string()]),
        };
        let shell = detect_shell(Some(&config));
        assert_eq!(shell.binary, PathBuf::from("zsh"));
        assert_eq!(shell.args, vec!["-fc"]);
        assert_eq!(shell.name, "configured");
    }

    #[test]
    fn config_override_infers_args() {
        let config = ShellConfig {
            binary: Some("/bin/dash".to_string()),
            args: None,
        };
        assert_eq!(detect_shell(Some(&config)).args, vec!["-c"]);
    }

    #[test]
    fn detection_without_config_finds_a_shell() {
        let shell = detect_shell(None);
        assert!(!shell.binary.as_os_str().is_empty());
        assert!(!shell.args.is_empty());
    }

    #[test]
    fn command_spec_appends_command_after_shell_args() {
        let config = ShellConfig {
            binary: Some("/bin/sh".to_string()),
            args: None,
        };
        let spec = detect_shell(Some(&config)).command_spec("echo hi");
        assert_eq!(spec.program, PathBuf::from("/bin/sh"));
        assert_eq!(spec.args, vec!["-c", "echo hi"]);
        assert_eq!(spec.env_mode, EnvMode::Sanitized);
    }
}
