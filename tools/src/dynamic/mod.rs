//! Script-backed tools discovered at runtime.
//!
//! A dynamic tool is any runnable file in the user (`~/.warden/tools`) or
//! project (`<root>/.warden/tools`) directory. It is run twice in its life:
//!
//! - describe: `WARDEN_TOOL_MODE=describe`, no stdin, prints a manifest
//! - execute: `WARDEN_TOOL_MODE=execute`, one JSON line of arguments on stdin
//!
//! Manifests are cached for the life of the registry; `reload()` rescans.

mod manifest;
mod schema;

pub use manifest::{
    DynamicParam, DynamicToolManifest, Launcher, ManifestError, ParamKind, ToolOrigin,
    parse_manifest,
};
pub use schema::{SynthesizedSchema, apply_defaults, stdin_payload, synthesize_schema};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use warden_types::ToolOutput;

use crate::config::DynamicToolConfig;
use crate::executor::{ProcessOutcome, ProgressSink, RunOptions, SandboxedExecutor};
use crate::{ToolCtx, ToolDescriptor, ToolError, ToolFut, ToolRegistry, validate_args};

/// Environment variable selecting the protocol phase.
pub const TOOL_MODE_ENV: &str = "WARDEN_TOOL_MODE";

/// Kill timer for execute mode. Not configurable.
pub const EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Describe output larger than this is not a manifest.
const MANIFEST_OUTPUT_LIMIT: usize = 64 * 1024;

/// Grace on top of the script's own kill timer, so the executor reports the
/// timeout before the orchestrator's outer bound fires.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

const NO_OUTPUT: &str = "(no output)";

#[derive(Debug)]
struct ScriptRunner {
    executor: SandboxedExecutor,
    config: DynamicToolConfig,
    project_root: PathBuf,
    execute_timeout: Duration,
}

impl ScriptRunner {
    async fn describe(
        &self,
        script: PathBuf,
        origin: ToolOrigin,
        launcher: Launcher,
    ) -> Result<DynamicToolManifest, ToolError> {
        let discovery = |message: String| ToolError::Discovery {
            script: script.clone(),
            message,
        };
        let spec = launcher.spec(&script).env(TOOL_MODE_ENV, "describe");
        let opts = RunOptions::new(
            &self.project_root,
            self.config.describe_timeout(),
            CancellationToken::new(),
            MANIFEST_OUTPUT_LIMIT,
        );

        match self.executor.run(spec, opts).await? {
            ProcessOutcome::Completed(output) if output.success() => {
                if output.stdout_truncated {
                    return Err(discovery(format!(
                        "manifest exceeds {MANIFEST_OUTPUT_LIMIT} bytes"
                    )));
                }
                parse_manifest(&output.stdout, &script, origin, launcher)
                    .map_err(|e| discovery(e.to_string()))
            }
            ProcessOutcome::Completed(output) => Err(discovery(format!(
                "describe exited with {}: {}",
                output
                    .exit_code
                    .map_or_else(|| "signal".to_string(), |code| format!("code {code}")),
                output.stderr.trim()
            ))),
            ProcessOutcome::TimedOut { elapsed } => {
                Err(discovery(format!("describe timed out after {elapsed:?}")))
            }
            ProcessOutcome::Aborted => Err(discovery("describe aborted".to_string())),
        }
    }

    async fn invoke(
        &self,
        manifest: &DynamicToolManifest,
        schema: &SynthesizedSchema,
        mut args: Value,
        cwd: &Path,
        cancel: CancellationToken,
        progress: Option<ProgressSink>,
    ) -> Result<ToolOutput, ToolError> {
        apply_defaults(&mut args, &schema.defaults);
        validate_args(&schema.schema, &args)?;

        let spec = manifest
            .launcher
            .spec(&manifest.script_path)
            .env(TOOL_MODE_ENV, "execute");
        let mut opts = RunOptions::new(
            cwd,
            self.execute_timeout,
            cancel,
            self.config.max_output_bytes,
        )
        .with_stdin(stdin_payload(manifest, &args).into_bytes());
        if let Some(sink) = progress {
            opts = opts.with_progress(sink);
        }

        tracing::info!(
            tool = %manifest.name,
            origin = manifest.origin.as_str(),
            script = %manifest.script_path.display(),
            "Executing dynamic tool"
        );
        let tool = manifest.name.clone();
        match self.executor.run(spec, opts).await? {
            ProcessOutcome::Completed(output) if output.success() => Ok(render_output(output)),
            ProcessOutcome::Completed(output) => {
                let stderr = output.stderr.trim_end();
                let message = if stderr.trim().is_empty() {
                    format!("exit code {}", output.exit_code.unwrap_or(-1))
                } else {
                    stderr.to_string()
                };
                Err(ToolError::ExecutionFailed { tool, message })
            }
            ProcessOutcome::TimedOut { elapsed } => Err(ToolError::Timeout { tool, elapsed }),
            ProcessOutcome::Aborted => Err(ToolError::Aborted { tool }),
        }
    }
}

/// stdout, else stderr, else a placeholder. Complete JSON object/array stdout is structured.
fn render_output(output: crate::executor::CapturedOutput) -> ToolOutput {
    if !output.stdout.trim().is_empty() {
        if !output.stdout_truncated
            && let Ok(value) = serde_json::from_str::<Value>(output.stdout.trim())
            && (value.is_object() || value.is_array())
        {
            return ToolOutput::Json(value);
        }
        return ToolOutput::Text(output.stdout);
    }
    if !output.stderr.trim().is_empty() {
        return ToolOutput::Text(output.stderr);
    }
    ToolOutput::Text(NO_OUTPUT.to_string())
}

/// A dynamic tool ready for registration.
#[derive(Debug, Clone)]
pub struct DynamicTool {
    manifest: Arc<DynamicToolManifest>,
    descriptor: ToolDescriptor,
    schema: Arc<SynthesizedSchema>,
    runner: Arc<ScriptRunner>,
}

impl DynamicTool {
    fn new(manifest: Arc<DynamicToolManifest>, runner: Arc<ScriptRunner>) -> Result<Self, ToolError> {
        let schema = synthesize_schema(&manifest);
        let descriptor = ToolDescriptor::new(
            manifest.name.clone(),
            manifest.description.clone(),
            schema.schema.clone(),
            manifest.interaction,
        )?;
        Ok(Self {
            manifest,
            descriptor,
            schema: Arc::new(schema),
            runner,
        })
    }

    #[must_use]
    pub fn manifest(&self) -> &DynamicToolManifest {
        &self.manifest
    }

    #[must_use]
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.runner.execute_timeout + TIMEOUT_GRACE
    }

    #[must_use]
    pub fn approval_summary(&self, args: &Value) -> String {
        format!(
            "Run {} tool '{}' ({}) with {}",
            self.manifest.origin.as_str(),
            self.manifest.name,
            self.manifest.script_path.display(),
            args
        )
    }

    pub fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            self.runner
                .invoke(
                    &self.manifest,
                    &self.schema,
                    args,
                    &ctx.working_dir,
                    ctx.cancel.clone(),
                    Some(ctx.progress()),
                )
                .await
        })
    }
}

type ManifestSet = Arc<[Arc<DynamicToolManifest>]>;

/// Discovers, caches, and invokes dynamic tools.
#[derive(Debug)]
pub struct DynamicToolRegistry {
    runner: Arc<ScriptRunner>,
    cache: RwLock<Option<ManifestSet>>,
}

impl DynamicToolRegistry {
    /// `project_root` is both the default project tool location and the describe cwd.
    #[must_use]
    pub fn new(config: DynamicToolConfig, executor: SandboxedExecutor, project_root: PathBuf) -> Self {
        Self {
            runner: Arc::new(ScriptRunner {
                executor,
                config,
                project_root,
                execute_timeout: EXECUTE_TIMEOUT,
            }),
            cache: RwLock::new(None),
        }
    }

    /// Descriptors of every discovered tool, scanning on first use.
    pub async fn discover(&self) -> Vec<ToolDescriptor> {
        self.tools()
            .await
            .into_iter()
            .map(|tool| tool.descriptor)
            .collect()
    }

    /// Drop the cache and rescan.
    pub async fn reload(&self) -> Vec<ToolDescriptor> {
        *self.cache.write().await = None;
        tracing::info!("Reloading dynamic tools");
        self.discover().await
    }

    /// Registrable tools for every cached manifest.
    pub async fn tools(&self) -> Vec<DynamicTool> {
        self.manifests()
            .await
            .iter()
            .filter_map(|manifest| {
                DynamicTool::new(Arc::clone(manifest), Arc::clone(&self.runner))
                    .inspect_err(|e| {
                        tracing::warn!(tool = %manifest.name, error = %e, "Skipping dynamic tool");
                    })
                    .ok()
            })
            .collect()
    }

    /// Run a manifest's script in execute mode from the project root.
    pub async fn invoke(
        &self,
        manifest: &DynamicToolManifest,
        args: Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let schema = synthesize_schema(manifest);
        self.runner
            .invoke(manifest, &schema, args, &self.runner.project_root, cancel, None)
            .await
    }

    pub async fn manifests(&self) -> ManifestSet {
        if let Some(cached) = self.cache.read().await.as_ref() {
            return Arc::clone(cached);
        }
        let mut guard = self.cache.write().await;
        if let Some(cached) = guard.as_ref() {
            return Arc::clone(cached);
        }
        let scanned: ManifestSet = self.scan().await.into();
        *guard = Some(Arc::clone(&scanned));
        scanned
    }

    async fn scan(&self) -> Vec<Arc<DynamicToolManifest>> {
        let config = &self.runner.config;
        if !config.enabled {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        if let Some(user_dir) = config.resolved_user_dir() {
            candidates.extend(list_scripts(&user_dir, ToolOrigin::User));
        }
        let project_dir = config.resolved_project_dir(&self.runner.project_root);
        candidates.extend(list_scripts(&project_dir, ToolOrigin::Project));

        let described = join_all(
            candidates
                .into_iter()
                .map(|(script, origin, launcher)| self.runner.describe(script, origin, launcher)),
        )
        .await;

        let mut merged: Vec<Arc<DynamicToolManifest>> = Vec::new();
        for result in described {
            match result {
                Ok(manifest) => {
                    if let Some(pos) = merged.iter().position(|m| m.name == manifest.name) {
                        let replaced = merged.remove(pos);
                        tracing::info!(
                            tool = %manifest.name,
                            replaced = %replaced.script_path.display(),
                            by = %manifest.script_path.display(),
                            "Dynamic tool overridden"
                        );
                    }
                    merged.push(Arc::new(manifest));
                }
                Err(e) => tracing::warn!(error = %e, "Skipping dynamic tool"),
            }
        }

        if merged.len() > config.max_tools {
            let excess = merged.len() - config.max_tools;
            for dropped in merged.drain(..excess) {
                tracing::warn!(
                    tool = %dropped.name,
                    max_tools = config.max_tools,
                    "Dynamic tool limit reached; dropping oldest entry"
                );
            }
        }
        tracing::info!(count = merged.len(), "Discovered dynamic tools");
        merged
    }
}

/// Runnable, non-hidden files in `dir`, sorted by file name.
fn list_scripts(dir: &Path, origin: ToolOrigin) -> Vec<(PathBuf, ToolOrigin, Launcher)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "No dynamic tool directory");
            return Vec::new();
        }
    };

    let mut scripts: Vec<(PathBuf, ToolOrigin, Launcher)> = entries
        .filter_map(Result::ok)
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| Launcher::for_script(&path).map(|launcher| (path, origin, launcher)))
        .collect();
    scripts.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
    scripts
}

/// Register discovered tools, skipping names a static tool already owns.
///
/// Returns how many were registered.
pub fn register_dynamic_tools(registry: &mut ToolRegistry, tools: Vec<DynamicTool>) -> usize {
    let mut registered = 0;
    for tool in tools {
        let name = tool.manifest().name.clone();
        if registry.contains(&name) {
            tracing::warn!(tool = %name, "Dynamic tool name collides with a built-in tool; skipping");
            continue;
        }
        match registry.register_dynamic(tool) {
            Ok(()) => registered += 1,
            Err(e) => tracing::warn!(tool = %name, error = %e, "Failed to register dynamic tool"),
        }
    }
    registered
}
