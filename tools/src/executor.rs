//! Sandboxed subprocess execution.
//!
//! The executor never classifies: callers hand it a command that already has an
//! allow verdict and a working directory that already passed the path sandbox.
//! It owns the rest: environment scrubbing, bounded output capture, the
//! per-call timer and cancellation, and killing the whole process group when
//! either fires.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use warden_types::TRUNCATION_MARKER;

use crate::process::SubprocessHandle;
use crate::{DEFAULT_SCRIPT_ENV_ALLOWLIST, EnvSanitizer, ToolError, ToolEvent};

/// How the child's environment is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvMode {
    /// Inherit ours minus the secret denylist.
    Sanitized,
    /// Start empty and copy only allow-listed variables.
    AllowList,
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env_mode: EnvMode,
    /// Set after sanitization; never filtered.
    pub extra_env: Vec<(String, String)>,
}

impl ProcessSpec {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, env_mode: EnvMode) -> Self {
        Self {
            program: program.into(),
            args,
            env_mode,
            extra_env: Vec::new(),
        }
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.push((key.into(), value.into()));
        self
    }

    fn display_name(&self) -> String {
        self.program
            .file_name()
            .map_or_else(|| self.program.display().to_string(), |n| n.to_string_lossy().into_owned())
    }
}

/// Streams output chunks to the event channel as `Update` events.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<ToolEvent>,
    tool_call_id: String,
}

impl ProgressSink {
    #[must_use]
    pub fn new(tx: mpsc::Sender<ToolEvent>, tool_call_id: String) -> Self {
        Self { tx, tool_call_id }
    }

    /// Best-effort: a full channel drops the update rather than stalling the reader.
    pub fn send(&self, text: impl Into<String>, detail: Option<&str>) {
        let event = ToolEvent::update(&self.tool_call_id, text, detail.map(str::to_string));
        let _ = self.tx.try_send(event);
    }
}

/// How to run it.
#[derive(Debug)]
pub struct RunOptions {
    /// Must be a sandbox-validated directory.
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub cancel: CancellationToken,
    /// Cap per stream, in bytes.
    pub output_limit: usize,
    pub stdin: Option<Vec<u8>>,
    pub progress: Option<ProgressSink>,
}

impl RunOptions {
    #[must_use]
    pub fn new(
        cwd: impl Into<PathBuf>,
        timeout: Duration,
        cancel: CancellationToken,
        output_limit: usize,
    ) -> Self {
        Self {
            cwd: cwd.into(),
            timeout,
            cancel,
            output_limit,
            stdin: None,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_stdin(mut self, payload: Vec<u8>) -> Self {
        self.stdin = Some(payload);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }
}

/// Bounded capture of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl CapturedOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout, then stderr under a `[stderr]` header when non-empty.
    #[must_use]
    pub fn combined(&self) -> String {
        let mut output = self.stdout.clone();
        if !self.stderr.trim().is_empty() {
            if !output.is_empty() {
                output.push_str("\n\n");
            }
            output.push_str("[stderr]\n");
            output.push_str(&self.stderr);
        }
        output
    }
}

/// How a subprocess ended. Exactly one per spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed(CapturedOutput),
    TimedOut { elapsed: Duration },
    Aborted,
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    const fn label(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

enum Exit {
    Status(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Aborted,
}

/// Spawns and supervises subprocesses for tools.
#[derive(Debug, Clone)]
pub struct SandboxedExecutor {
    env_sanitizer: EnvSanitizer,
    script_env_allowlist: Arc<[String]>,
}

impl SandboxedExecutor {
    #[must_use]
    pub fn new(env_sanitizer: EnvSanitizer, script_env_allowlist: Vec<String>) -> Self {
        Self {
            env_sanitizer,
            script_env_allowlist: script_env_allowlist.into(),
        }
    }

    pub fn with_defaults() -> Result<Self, ToolError> {
        Ok(Self::new(
            EnvSanitizer::with_defaults()?,
            DEFAULT_SCRIPT_ENV_ALLOWLIST
                .iter()
                .map(ToString::to_string)
                .collect(),
        ))
    }

    /// Run `spec` to completion, timeout, or cancellation.
    ///
    /// Timeout and cancellation kill the process group and are reported as
    /// outcomes, not errors. Errors mean the process could not be started.
    pub async fn run(
        &self,
        spec: ProcessSpec,
        opts: RunOptions,
    ) -> Result<ProcessOutcome, ToolError> {
        let tool = spec.display_name();
        if opts.cancel.is_cancelled() {
            return Ok(ProcessOutcome::Aborted);
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&opts.cwd)
            .stdin(if opts.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        self.apply_env(&mut command, &spec);

        let mut handle =
            SubprocessHandle::spawn(&mut command).map_err(|e| ToolError::ExecutionFailed {
                tool: tool.clone(),
                message: format!("failed to start {}: {e}", spec.program.display()),
            })?;
        tracing::info!(
            program = %spec.program.display(),
            pid = handle.pid(),
            cwd = %opts.cwd.display(),
            timeout = ?opts.timeout,
            "Started subprocess"
        );

        if let Some(payload) = opts.stdin
            && let Some(mut stdin) = handle.child_mut().stdin.take()
        {
            tokio::spawn(async move {
                // A child that never reads stdin closes the pipe; that is not our error.
                let _ = stdin.write_all(&payload).await;
                let _ = stdin.shutdown().await;
            });
        }

        let capture_failed = |stream: &str| ToolError::ExecutionFailed {
            tool: tool.clone(),
            message: format!("Failed to capture {stream}"),
        };
        let stdout = handle
            .child_mut()
            .stdout
            .take()
            .ok_or_else(|| capture_failed("stdout"))?;
        let stderr = handle
            .child_mut()
            .stderr
            .take()
            .ok_or_else(|| capture_failed("stderr"))?;

        let stdout_task = tokio::spawn(read_stream(
            stdout,
            opts.progress.clone(),
            OutputStream::Stdout,
            opts.output_limit,
        ));
        let stderr_task = tokio::spawn(read_stream(
            stderr,
            opts.progress.clone(),
            OutputStream::Stderr,
            opts.output_limit,
        ));

        let exit = tokio::select! {
            biased;
            () = opts.cancel.cancelled() => Exit::Aborted,
            () = tokio::time::sleep(opts.timeout) => Exit::TimedOut,
            status = handle.wait() => Exit::Status(status),
        };

        match exit {
            Exit::Aborted => {
                handle.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                tracing::info!(program = %spec.program.display(), "Subprocess aborted");
                Ok(ProcessOutcome::Aborted)
            }
            Exit::TimedOut => {
                handle.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                let elapsed = handle.elapsed();
                tracing::warn!(program = %spec.program.display(), ?elapsed, "Subprocess timed out");
                Ok(ProcessOutcome::TimedOut { elapsed })
            }
            Exit::Status(status) => {
                let status = status.map_err(|e| ToolError::ExecutionFailed {
                    tool: tool.clone(),
                    message: e.to_string(),
                })?;
                let (stdout, stdout_truncated) = stdout_task.await.unwrap_or_default();
                let (stderr, stderr_truncated) = stderr_task.await.unwrap_or_default();
                tracing::debug!(
                    program = %spec.program.display(),
                    exit_code = status.code(),
                    elapsed = ?handle.elapsed(),
                    "Subprocess exited"
                );
                Ok(ProcessOutcome::Completed(CapturedOutput {
                    stdout: decode_capped(stdout, stdout_truncated),
                    stderr: decode_capped(stderr, stderr_truncated),
                    exit_code: status.code(),
                    stdout_truncated,
                    stderr_truncated,
                }))
            }
        }
    }

    fn apply_env(&self, command: &mut Command, spec: &ProcessSpec) {
        match spec.env_mode {
            EnvMode::Sanitized => {
                for (key, _) in std::env::vars_os() {
                    if let Some(name) = key.to_str()
                        && self.env_sanitizer.is_denied(name)
                    {
                        command.env_remove(&key);
                    }
                }
            }
            EnvMode::AllowList => {
                command.env_clear();
                for key in self.script_env_allowlist.iter() {
                    if let Some(value) = std::env::var_os(key) {
                        command.env(key, value);
                    }
                }
            }
        }
        for (key, value) in &spec.extra_env {
            command.env(key, value);
        }
    }
}

/// Read a stream to EOF, keeping at most `max_collect` bytes.
///
/// Keeps draining past the cap so the child never blocks on a full pipe.
async fn read_stream<R: AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    progress: Option<ProgressSink>,
    stream: OutputStream,
    max_collect: usize,
) -> (Vec<u8>, bool) {
    let mut buf = [0u8; 4096];
    let mut collected = Vec::new();
    let mut truncated = false;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let remaining = max_collect.saturating_sub(collected.len());
        if n > remaining {
            truncated = true;
        }
        collected.extend_from_slice(&buf[..n.min(remaining)]);
        if let Some(sink) = &progress {
            let chunk = String::from_utf8_lossy(&buf[..n]);
            sink.send(crate::sanitize_output(&chunk), Some(stream.label()));
        }
    }
    (collected, truncated)
}

/// Decode capped bytes, dropping a multi-byte char split by the cap, and mark truncation.
fn decode_capped(mut bytes: Vec<u8>, truncated: bool) -> String {
    if truncated {
        let cut = match std::str::from_utf8(&bytes) {
            Err(e) if e.error_len().is_none() => Some(e.valid_up_to()),
            _ => None,
        };
        if let Some(cut) = cut {
            bytes.truncate(cut);
        }
    }
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    if truncated {
        text.push_str(TRUNCATION_MARKER);
    }
    text
}

/// Interpreter for the `Script` tool, with the narrowest flags it supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptRuntime {
    Deno,
    Node,
    Python,
}

impl ScriptRuntime {
    /// First runtime found on `PATH`, in order of how well it can be confined.
    #[must_use]
    pub fn detect() -> Option<Self> {
        [Self::Deno, Self::Node, Self::Python]
            .into_iter()
            .find(|runtime| which::which(runtime.binary()).is_ok())
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "deno" => Some(Self::Deno),
            "node" | "nodejs" => Some(Self::Node),
            "python" | "python3" => Some(Self::Python),
            _ => None,
        }
    }

    #[must_use]
    pub const fn binary(self) -> &'static str {
        match self {
            Self::Deno => "deno",
            Self::Node => "node",
            Self::Python => "python3",
        }
    }

    /// Spec reading the script from stdin, with filesystem access limited to `cwd`
    /// where the runtime can enforce it. Python has no capability model; `-I` only
    /// isolates it from user site-packages and `PYTHON*` variables.
    #[must_use]
    pub fn spec(self, cwd: &Path) -> ProcessSpec {
        let cwd = cwd.display();
        let args = match self {
            Self::Deno => vec![
                "run".to_string(),
                format!("--allow-read={cwd}"),
                format!("--allow-write={cwd}"),
                "--no-prompt".to_string(),
                "-".to_string(),
            ],
            Self::Node => vec![
                "--permission".to_string(),
                format!("--allow-fs-read={cwd}"),
                format!("--allow-fs-write={cwd}"),
                "-".to_string(),
            ],
            Self::Python => vec!["-I".to_string(), "-".to_string()],
        };
        ProcessSpec::new(self.binary(), args, EnvMode::AllowList)
    }
}
