//! Turns a [`WardenConfig`] into ready-to-use tool settings and registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use warden_tools::builtins::{BuiltinConfig, register_builtins};
use warden_tools::config::DynamicToolConfig;
use warden_tools::dynamic::register_dynamic_tools;
use warden_tools::list_cache::DirListingCache;
use warden_tools::sandbox::default_sandbox_deny_patterns;
use warden_tools::shell::detect_shell;
use warden_tools::{
    AllowedDirectorySet, CommandSafetyClassifier, DEFAULT_ENV_DENYLIST,
    DEFAULT_SCRIPT_ENV_ALLOWLIST, DynamicToolRegistry, EnvSanitizer, PathSandbox,
    SandboxedExecutor, ScriptRuntime, ToolError, ToolRegistry, ToolSettings, ToolTimeouts,
};

use crate::config::{
    DEFAULT_MAX_TOOL_OUTPUT_BYTES, DEFAULT_SCRIPT_TIMEOUT_SECS, DEFAULT_TOOL_FILE_TIMEOUT_SECS,
    DEFAULT_TOOL_SHELL_TIMEOUT_SECS, DEFAULT_TOOL_TIMEOUT_SECS, WardenConfig, expand_path,
};
use crate::orchestrator::DEFAULT_MAX_ITERATIONS_PER_TURN;

/// Everything a session needs to run tools.
#[derive(Debug)]
pub struct ToolSession {
    pub settings: ToolSettings,
    pub registry: Arc<ToolRegistry>,
    pub dynamic: DynamicToolRegistry,
    pub max_iterations_per_turn: u32,
}

/// Build the sandbox, classifier and executor from config.
///
/// `working_dir` becomes the primary allowed root. Invalid patterns or roots
/// are errors; nothing falls back to a looser policy.
pub fn build_settings(config: &WardenConfig, working_dir: &Path) -> Result<ToolSettings, ToolError> {
    let sandbox_cfg = config.sandbox.as_ref();
    let mut roots = vec![working_dir.to_path_buf()];
    roots.extend(
        sandbox_cfg
            .map(|cfg| cfg.allowed_roots.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|raw| expand_path(raw)),
    );

    let mut denied_patterns = sandbox_cfg
        .map(|cfg| cfg.denied_patterns.clone())
        .unwrap_or_default();
    if sandbox_cfg.is_none_or(|cfg| cfg.include_default_denies) {
        denied_patterns.extend(default_sandbox_deny_patterns());
    }
    let sandbox = PathSandbox::new(AllowedDirectorySet::new(roots)?, &denied_patterns)?;

    let extra_patterns = config
        .command_safety
        .as_ref()
        .map(|cfg| cfg.pairs())
        .unwrap_or_default();
    let classifier = CommandSafetyClassifier::new(&extra_patterns)?;

    let env_cfg = config.environment.as_ref();
    let mut env_patterns: Vec<String> = DEFAULT_ENV_DENYLIST
        .iter()
        .map(ToString::to_string)
        .collect();
    if let Some(cfg) = env_cfg {
        env_patterns.extend(cfg.denylist.iter().cloned());
    }
    let script_allowlist = env_cfg
        .and_then(|cfg| cfg.script_allowlist.clone())
        .unwrap_or_else(|| {
            DEFAULT_SCRIPT_ENV_ALLOWLIST
                .iter()
                .map(ToString::to_string)
                .collect()
        });
    let executor = SandboxedExecutor::new(EnvSanitizer::new(&env_patterns)?, script_allowlist);

    let shell = detect_shell(config.shell.as_ref());
    tracing::info!(shell = %shell.name, binary = ?shell.binary, "Detected shell");

    let timeouts_cfg = config.timeouts.as_ref();
    let timeouts = ToolTimeouts {
        default_timeout: Duration::from_secs(
            timeouts_cfg
                .and_then(|cfg| cfg.default_seconds)
                .unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS),
        ),
        file_operations_timeout: Duration::from_secs(
            timeouts_cfg
                .and_then(|cfg| cfg.file_operations_seconds)
                .unwrap_or(DEFAULT_TOOL_FILE_TIMEOUT_SECS),
        ),
        shell_commands_timeout: Duration::from_secs(
            timeouts_cfg
                .and_then(|cfg| cfg.shell_commands_seconds)
                .unwrap_or(DEFAULT_TOOL_SHELL_TIMEOUT_SECS),
        ),
    };

    let max_output_bytes = config
        .output
        .as_ref()
        .and_then(|cfg| cfg.max_bytes)
        .unwrap_or(DEFAULT_MAX_TOOL_OUTPUT_BYTES);

    Ok(ToolSettings {
        sandbox,
        classifier: Arc::new(classifier),
        executor,
        shell,
        timeouts,
        max_output_bytes,
        approval_mode: config.approval_mode(),
    })
}

/// Register the built-in tools and every discovered dynamic tool.
pub async fn bootstrap(config: &WardenConfig, working_dir: &Path) -> Result<ToolSession, ToolError> {
    let settings = build_settings(config, working_dir)?;
    let mut registry = ToolRegistry::new(settings.approval_mode);

    let script_runtime = resolve_script_runtime(
        config
            .script
            .as_ref()
            .and_then(|cfg| cfg.runtime.as_deref()),
    );
    let script_timeout = Duration::from_secs(
        config
            .timeouts
            .as_ref()
            .and_then(|cfg| cfg.script_seconds)
            .unwrap_or(DEFAULT_SCRIPT_TIMEOUT_SECS),
    );
    register_builtins(
        &mut registry,
        BuiltinConfig {
            shell: settings.shell.clone(),
            shell_timeout: settings.timeouts.shell_commands_timeout,
            script_runtime,
            script_timeout,
            list_cache: Arc::new(DirListingCache::default()),
        },
    )?;

    let dynamic = DynamicToolRegistry::new(
        dynamic_config(config),
        settings.executor.clone(),
        settings.sandbox.working_dir(),
    );
    let registered = register_dynamic_tools(&mut registry, dynamic.tools().await);
    tracing::info!(
        tools = registry.len(),
        dynamic = registered,
        approval_mode = ?settings.approval_mode,
        "Tool registry ready"
    );

    Ok(ToolSession {
        settings,
        registry: Arc::new(registry),
        dynamic,
        max_iterations_per_turn: config
            .max_iterations_per_turn
            .unwrap_or(DEFAULT_MAX_ITERATIONS_PER_TURN),
    })
}

fn resolve_script_runtime(configured: Option<&str>) -> Option<ScriptRuntime> {
    match configured {
        Some(name) => {
            let runtime = ScriptRuntime::from_name(name);
            if runtime.is_none() {
                tracing::warn!(runtime = %name, "Unknown script runtime; Script tool disabled");
            }
            runtime
        }
        None => ScriptRuntime::detect(),
    }
}

/// Dynamic tool settings with `~` and `${VAR}` expanded in directory overrides.
fn dynamic_config(config: &WardenConfig) -> DynamicToolConfig {
    let mut dynamic = config.dynamic.clone().unwrap_or_default();
    let expand = |dir: PathBuf| expand_path(&dir.to_string_lossy());
    dynamic.user_dir = dynamic.user_dir.map(expand);
    dynamic.project_dir = dynamic.project_dir.map(expand);
    dynamic
}
