//! Built-in tool executors.

use std::fmt::Write as _;
use std::io::Read as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use warden_types::{InteractionClass, ToolOutput, truncate_bytes_with_marker};

use super::{
    ToolCtx, ToolError, ToolExecutor, ToolFut, ToolRegistry, parse_args, sanitize_output,
};
use crate::config::default_true;
use crate::executor::{ProcessOutcome, RunOptions, ScriptRuntime};
use crate::list_cache::{DirListingCache, ListingEntry};
use crate::sandbox::Existence;
use crate::shell::DetectedShell;

const MAX_FILE_READ_BYTES: u64 = 8 * 1024 * 1024;
const MAX_LIST_ENTRIES: usize = 1000;
const NO_OUTPUT: &str = "(no output)";

/// Slack added to a subprocess tool's own kill timer for the orchestrator's outer bound.
const SUBPROCESS_TIMEOUT_GRACE: Duration = Duration::from_secs(1);

fn redact_summary(summary: &str) -> String {
    sanitize_output(&warden_utils::redact_api_keys(summary))
}

fn exec_failed(tool: &str, message: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool: tool.to_string(),
        message: message.to_string(),
    }
}

// ============================================================================
// Read
// ============================================================================

#[derive(Debug, Default)]
pub struct ReadTool;

#[derive(Debug, Deserialize)]
struct ReadArgs {
    path: String,
    offset: Option<usize>,
    limit: Option<usize>,
    #[serde(default = "default_true")]
    line_numbers: bool,
}

impl ToolExecutor for ReadTool {
    fn name(&self) -> &'static str {
        "Read"
    }

    fn description(&self) -> &'static str {
        "Read a text file inside the workspace, optionally a range of lines"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, absolute or relative to the working directory" },
                "offset": { "type": "integer", "minimum": 1, "description": "First line to read (1-indexed)" },
                "limit": { "type": "integer", "minimum": 1, "description": "Maximum number of lines to read" },
                "line_numbers": { "type": "boolean", "default": true, "description": "Prefix lines with their number" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn interaction_class(&self) -> InteractionClass {
        InteractionClass::ReadOnly
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: ReadArgs = parse_args(args)?;
        Ok(redact_summary(&format!("Read {}", typed.path)))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ReadArgs = parse_args(&args)?;
            if typed.offset == Some(0) {
                return Err(ToolError::BadArgs {
                    message: "offset must be >= 1".to_string(),
                });
            }

            let resolved = ctx
                .sandbox
                .validate(&typed.path, &ctx.working_dir, Existence::Required)?;
            let meta = std::fs::metadata(&resolved).map_err(|e| exec_failed("Read", e))?;
            if meta.is_dir() {
                return Err(exec_failed("Read", "path is a directory; use List"));
            }
            if meta.len() > MAX_FILE_READ_BYTES {
                return Err(exec_failed(
                    "Read",
                    format!("file is {} bytes; limit is {MAX_FILE_READ_BYTES}", meta.len()),
                ));
            }
            if sniff_binary(&resolved).map_err(|e| exec_failed("Read", e))? {
                return Ok(ToolOutput::Text(format!(
                    "[binary file, {} bytes]",
                    meta.len()
                )));
            }

            let bytes = std::fs::read(&resolved).map_err(|e| exec_failed("Read", e))?;
            let content = String::from_utf8_lossy(&bytes);
            let start = typed.offset.unwrap_or(1);
            let selected: Vec<&str> = content
                .lines()
                .skip(start - 1)
                .take(typed.limit.unwrap_or(usize::MAX))
                .collect();
            if selected.is_empty() {
                return Ok(ToolOutput::Text(if content.is_empty() {
                    "(empty file)".to_string()
                } else {
                    format!("(no lines at offset {start})")
                }));
            }

            let text = if typed.line_numbers {
                format_with_line_numbers(&selected, start)
            } else {
                selected.join("\n")
            };
            let text = truncate_bytes_with_marker(sanitize_output(&text), ctx.max_output_bytes);
            Ok(ToolOutput::Text(text))
        })
    }
}

fn sniff_binary(path: &Path) -> Result<bool, std::io::Error> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = [0u8; 8192];
    let n = file.read(&mut buf)?;
    // Only NUL marks binary; other non-UTF-8 text is decoded lossily.
    Ok(buf[..n].contains(&0))
}

fn format_with_line_numbers(lines: &[&str], start_line: usize) -> String {
    let width = (start_line + lines.len() - 1).to_string().len();
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(out, "{:>width$}| {line}", start_line + i);
    }
    out
}

// ============================================================================
// List
// ============================================================================

#[derive(Debug)]
pub struct ListTool {
    cache: Arc<DirListingCache>,
}

impl ListTool {
    #[must_use]
    pub fn new(cache: Arc<DirListingCache>) -> Self {
        Self { cache }
    }
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    #[serde(default = "default_list_path")]
    path: String,
}

fn default_list_path() -> String {
    ".".to_string()
}

impl ToolExecutor for ListTool {
    fn name(&self) -> &'static str {
        "List"
    }

    fn description(&self) -> &'static str {
        "List the entries of a directory; subdirectories end with '/'"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list (default: working directory)" }
            },
            "additionalProperties": false
        })
    }

    fn interaction_class(&self) -> InteractionClass {
        InteractionClass::ReadOnly
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: ListArgs = parse_args(args)?;
        Ok(redact_summary(&format!("List {}", typed.path)))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ListArgs = parse_args(&args)?;
            let dir = ctx.sandbox.validate_dir(&typed.path, &ctx.working_dir)?;

            let listing = if let Some(cached) = self.cache.get(&dir) {
                tracing::debug!(dir = %dir.display(), "Directory listing cache hit");
                cached
            } else {
                let listing = read_listing(&dir, |path| ctx.sandbox.is_path_denied(path))?;
                self.cache.insert(dir.clone(), Arc::clone(&listing));
                listing
            };

            if listing.is_empty() {
                return Ok(ToolOutput::Text("(empty directory)".to_string()));
            }
            let mut out = String::new();
            for entry in listing.iter().take(MAX_LIST_ENTRIES) {
                out.push_str(&entry.name);
                if entry.is_dir {
                    out.push('/');
                }
                out.push('\n');
            }
            if listing.len() > MAX_LIST_ENTRIES {
                let _ = writeln!(out, "... {} more", listing.len() - MAX_LIST_ENTRIES);
            }
            out.pop();
            Ok(ToolOutput::Text(truncate_bytes_with_marker(
                sanitize_output(&out),
                ctx.max_output_bytes,
            )))
        })
    }
}

/// Sorted entries of `dir`, without anything the deny patterns cover.
fn read_listing(
    dir: &Path,
    is_denied: impl Fn(&Path) -> bool,
) -> Result<Arc<[ListingEntry]>, ToolError> {
    let mut entries: Vec<ListingEntry> = std::fs::read_dir(dir)
        .map_err(|e| exec_failed("List", e))?
        .filter_map(Result::ok)
        .filter(|entry| !is_denied(&entry.path()))
        .map(|entry| ListingEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: entry.file_type().is_ok_and(|t| t.is_dir()),
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries.into())
}

// ============================================================================
// Write
// ============================================================================

#[derive(Debug)]
pub struct WriteTool {
    cache: Arc<DirListingCache>,
}

impl WriteTool {
    #[must_use]
    pub fn new(cache: Arc<DirListingCache>) -> Self {
        Self { cache }
    }
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

impl ToolExecutor for WriteTool {
    fn name(&self) -> &'static str {
        "Write"
    }

    fn description(&self) -> &'static str {
        "Write a file, creating parent directories; an existing file is backed up first"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to write" },
                "content": { "type": "string", "description": "Full file content" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn interaction_class(&self) -> InteractionClass {
        InteractionClass::Mutating
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: WriteArgs = parse_args(args)?;
        Ok(redact_summary(&format!(
            "Write {} ({} bytes)",
            typed.path,
            typed.content.len()
        )))
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: WriteArgs = parse_args(&args)?;
            let resolved = ctx
                .sandbox
                .validate(&typed.path, &ctx.working_dir, Existence::Optional)?;
            if resolved.is_dir() {
                return Err(exec_failed("Write", "path is a directory"));
            }

            if let Some(parent) = resolved.parent()
                && !parent.exists()
            {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    exec_failed(
                        "Write",
                        format!("failed to create parent directories for {}: {e}", resolved.display()),
                    )
                })?;
                ctx.sandbox.validate_created_parent(&resolved)?;
            }

            let bytes = typed.content.into_bytes();
            let byte_len = bytes.len();
            let write_path = resolved.clone();
            let backup = tokio::task::spawn_blocking(move || {
                warden_utils::write_with_backup(&write_path, &bytes)
            })
            .await
            .map_err(|e| exec_failed("Write", e))?
            .map_err(|e| exec_failed("Write", format!("failed to write {}: {e}", resolved.display())))?;

            if let Some(parent) = resolved.parent() {
                self.cache.invalidate(parent);
            }
            tracing::info!(
                path = %resolved.display(),
                bytes = byte_len,
                backup = backup.is_some(),
                "Wrote file"
            );

            let mut out = format!("Wrote {} ({byte_len} bytes)", resolved.display());
            if let Some(backup) = backup {
                let _ = write!(out, "\nPrevious version saved to {}", backup.display());
            }
            Ok(ToolOutput::Text(sanitize_output(&out)))
        })
    }
}

// ============================================================================
// Run
// ============================================================================

#[derive(Debug, Clone)]
pub struct RunTool {
    shell: DetectedShell,
    timeout: Duration,
}

impl RunTool {
    #[must_use]
    pub fn new(shell: DetectedShell, timeout: Duration) -> Self {
        Self { shell, timeout }
    }
}

#[derive(Debug, Deserialize)]
struct RunArgs {
    command: String,
    /// Shown to the user during approval only.
    #[serde(default)]
    reason: Option<String>,
    cwd: Option<String>,
}

impl ToolExecutor for RunTool {
    fn name(&self) -> &'static str {
        "Run"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the workspace"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" },
                "reason": { "type": "string", "description": "Why this command needs to run" },
                "cwd": { "type": "string", "description": "Directory to run in (default: working directory)" }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn interaction_class(&self) -> InteractionClass {
        InteractionClass::Mutating
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: RunArgs = parse_args(args)?;
        let summary = match typed.reason.as_deref().map(str::trim) {
            Some(reason) if !reason.is_empty() => {
                format!("Run command: {} ({reason})", typed.command)
            }
            _ => format!("Run command: {}", typed.command),
        };
        Ok(redact_summary(&summary))
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout + SUBPROCESS_TIMEOUT_GRACE)
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: RunArgs = parse_args(&args)?;
            if typed.command.trim().is_empty() {
                return Err(ToolError::BadArgs {
                    message: "command must not be empty".to_string(),
                });
            }

            // Classify before anything is spawned.
            let verdict = ctx.classifier.classify(&typed.command);
            if verdict.is_blocked() {
                tracing::warn!(
                    detector = verdict.detector.as_str(),
                    reason = %verdict.reason,
                    "Command blocked"
                );
                return Err(ToolError::CommandBlocked(verdict));
            }

            let cwd = match typed.cwd.as_deref() {
                Some(dir) => ctx.sandbox.validate_dir(dir, &ctx.working_dir)?,
                None => ctx.working_dir.clone(),
            };
            let opts = RunOptions::new(cwd, self.timeout, ctx.cancel.clone(), ctx.max_output_bytes)
                .with_progress(ctx.progress());

            match ctx
                .executor
                .run(self.shell.command_spec(&typed.command), opts)
                .await?
            {
                ProcessOutcome::Completed(output) => {
                    let combined = sanitize_output(&output.combined());
                    if output.success() {
                        Ok(ToolOutput::Text(if combined.trim().is_empty() {
                            NO_OUTPUT.to_string()
                        } else {
                            combined
                        }))
                    } else {
                        let code = output
                            .exit_code
                            .map_or_else(|| "signal".to_string(), |c| c.to_string());
                        Err(exec_failed("Run", format!("exit code {code}\n\n{combined}")))
                    }
                }
                ProcessOutcome::TimedOut { elapsed } => Err(ToolError::Timeout {
                    tool: "Run".to_string(),
                    elapsed,
                }),
                ProcessOutcome::Aborted => Err(ToolError::Aborted {
                    tool: "Run".to_string(),
                }),
            }
        })
    }
}

// ============================================================================
// Script
// ============================================================================

#[derive(Debug, Clone)]
pub struct ScriptTool {
    runtime: Option<ScriptRuntime>,
    timeout: Duration,
}

impl ScriptTool {
    #[must_use]
    pub fn new(runtime: Option<ScriptRuntime>, timeout: Duration) -> Self {
        Self { runtime, timeout }
    }
}

#[derive(Debug, Deserialize)]
struct ScriptArgs {
    code: String,
    runtime: Option<String>,
}

impl ToolExecutor for ScriptTool {
    fn name(&self) -> &'static str {
        "Script"
    }

    fn description(&self) -> &'static str {
        "Execute a short script with filesystem access limited to the working directory"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": { "type": "string", "description": "Script source" },
                "runtime": {
                    "type": "string",
                    "enum": ["deno", "node", "python"],
                    "description": "Interpreter (default: first available of deno, node, python)"
                }
            },
            "required": ["code"],
            "additionalProperties": false
        })
    }

    fn interaction_class(&self) -> InteractionClass {
        InteractionClass::Mutating
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        let typed: ScriptArgs = parse_args(args)?;
        let runtime = typed
            .runtime
            .as_deref()
            .or(self.runtime.map(ScriptRuntime::binary))
            .unwrap_or("script");
        Ok(redact_summary(&format!(
            "Run {runtime} script ({} bytes):\n{}",
            typed.code.len(),
            typed.code
        )))
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout + SUBPROCESS_TIMEOUT_GRACE)
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ScriptArgs = parse_args(&args)?;
            let runtime = match typed.runtime.as_deref() {
                Some(name) => ScriptRuntime::from_name(name).ok_or_else(|| ToolError::BadArgs {
                    message: format!("unknown runtime '{name}'"),
                })?,
                None => self
                    .runtime
                    .ok_or_else(|| exec_failed("Script", "no script runtime (deno, node, python3) on PATH"))?,
            };

            let cwd = ctx.working_dir.clone();
            let opts = RunOptions::new(&cwd, self.timeout, ctx.cancel.clone(), ctx.max_output_bytes)
                .with_stdin(typed.code.into_bytes())
                .with_progress(ctx.progress());

            match ctx.executor.run(runtime.spec(&cwd), opts).await? {
                ProcessOutcome::Completed(output) if output.success() => {
                    let combined = sanitize_output(&output.combined());
                    Ok(ToolOutput::Text(if combined.trim().is_empty() {
                        NO_OUTPUT.to_string()
                    } else {
                        combined
                    }))
                }
                ProcessOutcome::Completed(output) => {
                    let code = output
                        .exit_code
                        .map_or_else(|| "signal".to_string(), |c| c.to_string());
                    Err(exec_failed(
                        "Script",
                        format!("exit code {code}\n\n{}", sanitize_output(&output.combined())),
                    ))
                }
                ProcessOutcome::TimedOut { elapsed } => Err(ToolError::Timeout {
                    tool: "Script".to_string(),
                    elapsed,
                }),
                ProcessOutcome::Aborted => Err(ToolError::Aborted {
                    tool: "Script".to_string(),
                }),
            }
        })
    }
}

// ============================================================================
// Registration
// ============================================================================

#[derive(Debug, Clone)]
pub struct BuiltinConfig {
    pub shell: DetectedShell,
    pub shell_timeout: Duration,
    pub script_runtime: Option<ScriptRuntime>,
    pub script_timeout: Duration,
    /// Shared between `List` and `Write`.
    pub list_cache: Arc<DirListingCache>,
}

pub fn register_builtins(registry: &mut ToolRegistry, config: BuiltinConfig) -> Result<(), ToolError> {
    registry.register(Box::new(ReadTool))?;
    registry.register(Box::new(ListTool::new(Arc::clone(&config.list_cache))))?;
    registry.register(Box::new(WriteTool::new(config.list_cache)))?;
    registry.register(Box::new(RunTool::new(config.shell, config.shell_timeout)))?;
    registry.register(Box::new(ScriptTool::new(
        config.script_runtime,
        config.script_timeout,
    )))?;
    Ok(())
}
