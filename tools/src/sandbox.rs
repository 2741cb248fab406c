//! Filesystem sandbox: every path a tool touches is validated here first.
//!
//! Validation is lexical first (home expansion, absolutize, `.`/`..` folding,
//! root-relative check) and then physical: the path, or its nearest existing
//! ancestor, is canonicalized so a symlink inside the sandbox cannot point a
//! tool outside of it.
//!
//! Residual risk: a concurrent process can still swap a directory for a symlink
//! between validation and use. `validate_created_parent` narrows that window for
//! writes but does not close it.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use warden_types::is_unsafe_path_char;

use super::{DenialReason, ToolError};

/// Default deny patterns for sensitive files in tool filesystem sandbox policy.
pub const DEFAULT_SANDBOX_DENY_PATTERNS: &[&str] = &[
    "**/.ssh/**",
    "**/.gnupg/**",
    "**/.aws/**",
    "**/.azure/**",
    "**/.config/gcloud/**",
    "**/.git/**",
    "**/.git-credentials",
    "**/.npmrc",
    "**/.pypirc",
    "**/.netrc",
    "**/.env",
    "**/.env.*",
    "**/*.env",
    "**/id_rsa*",
    "**/id_ed25519*",
    "**/id_ecdsa*",
    "**/*.pem",
    "**/*.key",
    "**/*.p12",
    "**/*.pfx",
    "**/.warden/config.toml",
];

#[must_use]
pub fn default_sandbox_deny_patterns() -> Vec<String> {
    DEFAULT_SANDBOX_DENY_PATTERNS
        .iter()
        .map(std::string::ToString::to_string)
        .collect()
}

/// Whether validation requires the target to exist already.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Required,
    Optional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AllowedRoot {
    canonical: PathBuf,
    /// The root as configured, lexically normalized. Lets `/var/x` match when
    /// `/var` is itself a symlink (macOS `/var -> /private/var`).
    lexical: PathBuf,
}

/// Ordered set of canonical directories a session may touch.
///
/// Built once per session; cloning shares the same roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedDirectorySet {
    roots: Arc<[AllowedRoot]>,
}

impl AllowedDirectorySet {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Result<Self, ToolError> {
        let mut allowed = Vec::new();
        for root in roots {
            let canonical = std::fs::canonicalize(&root).map_err(|_e| {
                ToolError::SandboxViolation(DenialReason::PathOutsideSandbox {
                    attempted: root.clone(),
                    resolved: root.clone(),
                })
            })?;
            if !canonical.is_dir() {
                return Err(ToolError::BadArgs {
                    message: format!("allowed root {} is not a directory", root.display()),
                });
            }
            let lexical = if root.is_absolute() {
                normalize_lexically(&root)
            } else {
                canonical.clone()
            };
            let entry = AllowedRoot { canonical, lexical };
            if !allowed.contains(&entry) {
                allowed.push(entry);
            }
        }
        if allowed.is_empty() {
            return Err(ToolError::BadArgs {
                message: "at least one allowed root is required".to_string(),
            });
        }
        Ok(Self {
            roots: allowed.into(),
        })
    }

    /// The first configured root; the default working directory.
    #[must_use]
    pub fn primary(&self) -> &Path {
        &self.roots[0].canonical
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.roots.iter().map(|root| root.canonical.as_path())
    }

    /// Whether an already-canonical path lies inside some root.
    #[must_use]
    pub fn contains_canonical(&self, path: &Path) -> bool {
        self.roots
            .iter()
            .any(|root| relative_inside(&root.canonical, path).is_some())
    }

    fn contains_lexical(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| {
            relative_inside(&root.canonical, path).is_some()
                || relative_inside(&root.lexical, path).is_some()
        })
    }
}

/// Relative path from `root` to `path`, if it stays inside `root`.
///
/// Accepts an empty relative path (the root itself); rejects anything that
/// would need a parent traversal or is absolute.
fn relative_inside(root: &Path, path: &Path) -> Option<PathBuf> {
    let rel = path.strip_prefix(root).ok()?;
    let escapes = rel
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    (!escapes).then(|| rel.to_path_buf())
}

#[derive(Debug, Clone)]
struct DenyPattern {
    pattern: String,
    matcher: globset::GlobMatcher,
}

/// Filesystem sandbox configuration and validation.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    roots: AllowedDirectorySet,
    deny_patterns: Arc<[DenyPattern]>,
}

impl PathSandbox {
    pub fn new(roots: AllowedDirectorySet, denied_patterns: &[String]) -> Result<Self, ToolError> {
        let mut deny_patterns = Vec::new();
        for pat in denied_patterns {
            let mut builder = globset::GlobBuilder::new(pat);
            // Case-insensitive so "Secret.PEM" still matches "*.pem".
            builder.case_insensitive(true);
            let glob = builder.build().map_err(|e| ToolError::BadArgs {
                message: format!("Invalid denied pattern '{pat}': {e}"),
            })?;
            deny_patterns.push(DenyPattern {
                pattern: pat.clone(),
                matcher: glob.compile_matcher(),
            });
        }

        Ok(Self {
            roots,
            deny_patterns: deny_patterns.into(),
        })
    }

    #[must_use]
    pub fn roots(&self) -> &AllowedDirectorySet {
        &self.roots
    }

    #[must_use]
    pub fn working_dir(&self) -> PathBuf {
        self.roots.primary().to_path_buf()
    }

    /// Validate a requested path and return its canonical absolute form.
    ///
    /// Relative paths resolve against `working_dir`. With [`Existence::Required`]
    /// a missing target fails with [`ToolError::NotFound`], distinct from a
    /// sandbox violation.
    pub fn validate(
        &self,
        requested: &str,
        working_dir: &Path,
        existence: Existence,
    ) -> Result<PathBuf, ToolError> {
        if requested.trim().is_empty() {
            return Err(ToolError::BadArgs {
                message: "path must not be empty".to_string(),
            });
        }
        if requested.chars().any(is_unsafe_path_char) {
            return Err(ToolError::SandboxViolation(
                DenialReason::UnsafePathCharacters,
            ));
        }
        if contains_ntfs_ads(requested) {
            return Err(ToolError::BadArgs {
                message: "path contains NTFS alternate data stream syntax".to_string(),
            });
        }

        let expanded = expand_home(requested);
        let absolute = if expanded.is_absolute() {
            expanded
        } else {
            working_dir.join(expanded)
        };
        let lexical = normalize_lexically(&absolute);
        if !self.roots.contains_lexical(&lexical) {
            return Err(ToolError::SandboxViolation(
                DenialReason::PathOutsideSandbox {
                    attempted: PathBuf::from(requested),
                    resolved: lexical,
                },
            ));
        }

        let canonical = resolve_through_existing_ancestor(&lexical)?;
        if !self.roots.contains_canonical(&canonical) {
            tracing::warn!(
                requested,
                resolved = %canonical.display(),
                "Path escapes sandbox after symlink resolution"
            );
            return Err(ToolError::SandboxViolation(
                DenialReason::PathOutsideSandbox {
                    attempted: PathBuf::from(requested),
                    resolved: canonical,
                },
            ));
        }

        for candidate in [&lexical, &canonical] {
            if let Some(pattern) = self.matches_denied_pattern(candidate) {
                return Err(ToolError::SandboxViolation(
                    DenialReason::DeniedPatternMatched {
                        attempted: canonical.clone(),
                        pattern,
                    },
                ));
            }
        }

        if existence == Existence::Required && std::fs::symlink_metadata(&canonical).is_err() {
            return Err(ToolError::NotFound {
                path: PathBuf::from(requested),
            });
        }

        Ok(canonical)
    }

    /// Validate a directory to run a subprocess in.
    pub fn validate_dir(&self, requested: &str, working_dir: &Path) -> Result<PathBuf, ToolError> {
        let dir = self.validate(requested, working_dir, Existence::Required)?;
        if !dir.is_dir() {
            return Err(ToolError::BadArgs {
                message: format!("{requested} is not a directory"),
            });
        }
        Ok(dir)
    }

    /// Post-creation validation for TOCTOU mitigation.
    ///
    /// After `create_dir_all` creates the directory tree and before writing content,
    /// re-canonicalize the parent and verify it's still within allowed roots and
    /// that nothing below the root was swapped for a symlink.
    pub fn validate_created_parent(&self, path: &Path) -> Result<(), ToolError> {
        let parent = path.parent().ok_or_else(|| ToolError::BadArgs {
            message: "path has no parent directory".to_string(),
        })?;

        let mut current = parent.to_path_buf();
        while !self.is_root(&current) {
            if let Ok(meta) = std::fs::symlink_metadata(&current)
                && meta.file_type().is_symlink()
            {
                return Err(ToolError::SandboxViolation(
                    DenialReason::PathOutsideSandbox {
                        attempted: path.to_path_buf(),
                        resolved: current,
                    },
                ));
            }
            match current.parent() {
                Some(p) if p != current => current = p.to_path_buf(),
                _ => break,
            }
        }

        let canonical = std::fs::canonicalize(parent).map_err(|_| {
            ToolError::SandboxViolation(DenialReason::PathOutsideSandbox {
                attempted: path.to_path_buf(),
                resolved: parent.to_path_buf(),
            })
        })?;
        if !self.roots.contains_canonical(&canonical) {
            return Err(ToolError::SandboxViolation(
                DenialReason::PathOutsideSandbox {
                    attempted: path.to_path_buf(),
                    resolved: canonical,
                },
            ));
        }
        Ok(())
    }

    fn is_root(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| root == path)
    }

    fn matches_denied_pattern(&self, path: &Path) -> Option<String> {
        let normalized = path.to_string_lossy().replace('\\', "/");
        self.deny_patterns
            .iter()
            .find(|pat| pat.matcher.is_match(&normalized))
            .map(|pat| pat.pattern.clone())
    }

    /// Check if a path matches any deny pattern (no canonicalization).
    ///
    /// Suitable for filtering directory listings. For full validation use
    /// [`PathSandbox::validate`].
    #[must_use]
    pub fn is_path_denied(&self, path: &Path) -> bool {
        self.matches_denied_pattern(path).is_some()
    }
}

fn expand_home(requested: &str) -> PathBuf {
    if requested == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = requested.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(requested)
}

/// Fold `.` and `..` without touching the filesystem.
///
/// `..` at the filesystem root stays at the root.
pub(crate) fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
                if out.as_os_str().is_empty() {
                    out.push(Component::RootDir.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize `path`, or its nearest existing ancestor with the missing tail re-joined.
///
/// A dangling symlink anywhere on the way is rejected: following it on write
/// would create a file wherever it points.
fn resolve_through_existing_ancestor(path: &Path) -> Result<PathBuf, ToolError> {
    let reject = |resolved: &Path| {
        ToolError::SandboxViolation(DenialReason::PathOutsideSandbox {
            attempted: path.to_path_buf(),
            resolved: resolved.to_path_buf(),
        })
    };

    let mut missing: Vec<&std::ffi::OsStr> = Vec::new();
    let mut current = Some(path);
    while let Some(candidate) = current {
        if std::fs::symlink_metadata(candidate).is_ok() {
            let canonical = std::fs::canonicalize(candidate).map_err(|_| reject(candidate))?;
            let mut result = canonical;
            for part in missing.iter().rev() {
                result.push(part);
            }
            return Ok(result);
        }
        if let Some(name) = candidate.file_name() {
            missing.push(name);
        }
        current = candidate.parent();
    }
    Err(reject(path))
}

/// Detect NTFS Alternate Data Stream syntax (`file.txt:stream`) on Windows.
///
/// Colons are valid in Unix filenames, so this is always `false` elsewhere.
fn contains_ntfs_ads(input: &str) -> bool {
    if !cfg!(windows) {
        return false;
    }
    Path::new(input)
        .components()
        .any(|c| matches!(c, Component::Normal(s) if s.to_string_lossy().contains(':')))
}
