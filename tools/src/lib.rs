//! Tool Executor Framework - core types, helpers, and built-in tool implementations.

pub mod builtins;
pub mod command_safety;
pub mod config;
pub mod dynamic;
pub mod executor;
pub mod list_cache;
pub mod process;
pub mod sandbox;
pub mod shell;

pub use command_safety::{CommandSafetyClassifier, Detector, SafetyVerdict};
pub use dynamic::{DynamicTool, DynamicToolManifest, DynamicToolRegistry};
pub use executor::{
    CapturedOutput, EnvMode, ProcessOutcome, ProcessSpec, ProgressSink, RunOptions,
    SandboxedExecutor, ScriptRuntime,
};
pub use sandbox::{AllowedDirectorySet, Existence, PathSandbox};
pub use shell::DetectedShell;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use warden_types::{InteractionClass, ToolDefinition, ToolOutput, ToolStatus};

/// Tool execution future type alias.
pub type ToolFut<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;

/// Default environment variable denylist applied to shell commands and dynamic tools.
pub const DEFAULT_ENV_DENYLIST: &[&str] = &[
    "*_KEY",
    "*_SECRET",
    "*_TOKEN",
    "*_PASSWORD",
    "*_CREDENTIALS",
    "*_API_KEY",
    "AWS_*",
    "AZURE_*",
    "GOOGLE_APPLICATION_CREDENTIALS",
    "GITHUB_TOKEN",
    "SSH_AUTH_SOCK",
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_*",
];

/// Variables a script run may see; everything else is cleared.
pub const DEFAULT_SCRIPT_ENV_ALLOWLIST: &[&str] =
    &["PATH", "HOME", "LANG", "LC_ALL", "TERM", "TMPDIR", "USER"];

// ============================================================================
// Approval
// ============================================================================

/// Approval decision from the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

/// Approval mode policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApprovalMode {
    /// Only tools that are inherently interactive prompt.
    Permissive,
    /// Tools that spawn arbitrary code (`Run`, `Script`) prompt.
    #[default]
    Default,
    /// Every side-effecting tool prompts.
    Strict,
}

impl ApprovalMode {
    /// Effective interaction class for a tool registered under this mode.
    #[must_use]
    pub fn effective_class(self, base: InteractionClass, requires_approval: bool) -> InteractionClass {
        match (self, base) {
            (_, InteractionClass::Interactive) => InteractionClass::Interactive,
            (Self::Strict, InteractionClass::Mutating) => InteractionClass::Interactive,
            (Self::Default | Self::Strict, _) if requires_approval => InteractionClass::Interactive,
            (_, base) => base,
        }
    }
}

/// Confirmation request for a tool call.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub summary: String,
    pub arguments: Value,
}

// ============================================================================
// Events
// ============================================================================

/// Lifecycle event for one tool call.
///
/// Every call produces an `Init`, zero or more `Update`s, then exactly one
/// terminal `Completion` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolEvent {
    pub tool_call_id: String,
    pub kind: ToolEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolEventKind {
    Init {
        tool_name: String,
        description: String,
    },
    Update {
        text: String,
        detail: Option<String>,
    },
    Completion {
        summary: String,
    },
    Error {
        status: ToolStatus,
        message: String,
    },
}

impl ToolEvent {
    pub fn init(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            kind: ToolEventKind::Init {
                tool_name: tool_name.into(),
                description: description.into(),
            },
        }
    }

    pub fn update(
        tool_call_id: impl Into<String>,
        text: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            kind: ToolEventKind::Update {
                text: text.into(),
                detail,
            },
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error types for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Bad tool args: {message}")]
    BadArgs { message: String },
    #[error("Sandbox violation: {0}")]
    SandboxViolation(DenialReason),
    #[error("{0}")]
    CommandBlocked(SafetyVerdict),
    #[error("Not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("Tool execution failed: {tool}: {message}")]
    ExecutionFailed { tool: String, message: String },
    #[error("Tool timed out: {tool}")]
    Timeout { tool: String, elapsed: Duration },
    #[error("Tool aborted: {tool}")]
    Aborted { tool: String },
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },
    #[error("Duplicate tool registered: {name}")]
    DuplicateTool { name: String },
    #[error("Tool discovery failed for {}: {message}", script.display())]
    Discovery { script: PathBuf, message: String },
}

impl ToolError {
    /// Status reported to the model when this error ends a call.
    #[must_use]
    pub fn status(&self) -> ToolStatus {
        match self {
            Self::SandboxViolation(_) | Self::CommandBlocked(_) => ToolStatus::Blocked,
            Self::Timeout { .. } => ToolStatus::Timeout,
            Self::Aborted { .. } => ToolStatus::Aborted,
            Self::BadArgs { .. }
            | Self::NotFound { .. }
            | Self::ExecutionFailed { .. }
            | Self::UnknownTool { .. }
            | Self::DuplicateTool { .. }
            | Self::Discovery { .. } => ToolStatus::Error,
        }
    }
}

/// Denial reason for sandbox or policy.
#[derive(Debug, Clone)]
pub enum DenialReason {
    PathOutsideSandbox {
        attempted: PathBuf,
        resolved: PathBuf,
    },
    DeniedPatternMatched {
        attempted: PathBuf,
        pattern: String,
    },
    UnsafePathCharacters,
    UserDenied {
        tool: String,
    },
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::PathOutsideSandbox {
                attempted,
                resolved,
            } => write!(
                f,
                "Path outside sandbox (attempted: {}, resolved: {})",
                attempted.display(),
                resolved.display()
            ),
            DenialReason::DeniedPatternMatched { attempted, pattern } => write!(
                f,
                "Path '{}' matched denied pattern '{}'",
                attempted.display(),
                pattern
            ),
            DenialReason::UnsafePathCharacters => {
                write!(f, "path contains control or invisible characters")
            }
            DenialReason::UserDenied { tool } => write!(f, "User denied '{tool}'"),
        }
    }
}

// ============================================================================
// Executors and registry
// ============================================================================

/// A compiled-in tool.
pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    /// Concurrency class before the approval policy is applied.
    fn interaction_class(&self) -> InteractionClass;
    /// Whether the tool runs arbitrary code and needs confirmation under the default policy.
    fn requires_approval(&self) -> bool {
        false
    }
    fn approval_summary(&self, args: &Value) -> Result<String, ToolError>;
    fn timeout(&self) -> Option<Duration> {
        None
    }
    fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a>;
}

pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone()).map_err(|e| ToolError::BadArgs {
        message: e.to_string(),
    })
}

/// Whether `name` is acceptable as a tool name: `[A-Za-z][A-Za-z0-9_-]{0,63}`.
#[must_use]
pub fn is_valid_tool_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_alphabetic()
        && name.len() <= 64
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validated, immutable description of a registered tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    input_schema: Value,
    interaction: InteractionClass,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        interaction: InteractionClass,
    ) -> Result<Self, ToolError> {
        let name = name.into();
        if !is_valid_tool_name(&name) {
            return Err(ToolError::BadArgs {
                message: format!("invalid tool name '{name}'"),
            });
        }
        if let Err(e) = jsonschema::validator_for(&input_schema) {
            return Err(ToolError::BadArgs {
                message: format!("Invalid tool schema for '{name}': {e}"),
            });
        }
        Ok(Self {
            name,
            description: description.into(),
            input_schema,
            interaction,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    #[must_use]
    pub fn interaction(&self) -> InteractionClass {
        self.interaction
    }

    #[must_use]
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            self.name.clone(),
            self.description.clone(),
            self.input_schema.clone(),
            self.interaction,
        )
    }
}

/// The closed set of tool kinds the registry can dispatch to.
pub enum ToolKind {
    Static(Box<dyn ToolExecutor>),
    Dynamic(DynamicTool),
}

impl std::fmt::Debug for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(exec) => f.debug_tuple("Static").field(&exec.name()).finish(),
            Self::Dynamic(tool) => f.debug_tuple("Dynamic").field(&tool.manifest().name).finish(),
        }
    }
}

#[derive(Debug)]
pub struct RegisteredTool {
    descriptor: ToolDescriptor,
    kind: ToolKind,
}

impl RegisteredTool {
    #[must_use]
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn kind(&self) -> &ToolKind {
        &self.kind
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        match &self.kind {
            ToolKind::Static(exec) => exec.timeout(),
            ToolKind::Dynamic(tool) => Some(tool.timeout()),
        }
    }

    pub fn approval_summary(&self, args: &Value) -> Result<String, ToolError> {
        match &self.kind {
            ToolKind::Static(exec) => exec.approval_summary(args),
            ToolKind::Dynamic(tool) => Ok(tool.approval_summary(args)),
        }
    }

    pub fn execute<'a>(&'a self, args: Value, ctx: &'a mut ToolCtx) -> ToolFut<'a> {
        match &self.kind {
            ToolKind::Static(exec) => exec.execute(args, ctx),
            ToolKind::Dynamic(tool) => tool.execute(args, ctx),
        }
    }
}

/// Tool registry keyed by validated descriptor name.
///
/// Read-only once built; share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    approval_mode: ApprovalMode,
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new(approval_mode: ApprovalMode) -> Self {
        Self {
            approval_mode,
            tools: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, executor: Box<dyn ToolExecutor>) -> Result<(), ToolError> {
        let interaction = self
            .approval_mode
            .effective_class(executor.interaction_class(), executor.requires_approval());
        let descriptor = ToolDescriptor::new(
            executor.name(),
            executor.description(),
            executor.schema(),
            interaction,
        )?;
        self.insert(descriptor, ToolKind::Static(executor))
    }

    /// Script-backed tools run user code, so they prompt under
    /// [`ApprovalMode::Default`] like `Run` and `Script`, whatever class their
    /// manifest declares.
    pub fn register_dynamic(&mut self, tool: DynamicTool) -> Result<(), ToolError> {
        let base = tool.descriptor().clone();
        let interaction = self.approval_mode.effective_class(base.interaction(), true);
        let descriptor = ToolDescriptor {
            interaction,
            ..base
        };
        self.insert(descriptor, ToolKind::Dynamic(tool))
    }

    fn insert(&mut self, descriptor: ToolDescriptor, kind: ToolKind) -> Result<(), ToolError> {
        let name = descriptor.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateTool { name });
        }
        self.tools
            .insert(name, RegisteredTool { descriptor, kind });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&RegisteredTool, ToolError> {
        self.tools.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values().map(RegisteredTool::descriptor)
    }

    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.descriptors()
            .map(ToolDescriptor::to_definition)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ============================================================================
// Per-call context and settings
// ============================================================================

/// Per-call tool context.
#[derive(Debug)]
pub struct ToolCtx {
    pub tool_call_id: String,
    pub sandbox: PathSandbox,
    pub working_dir: PathBuf,
    pub executor: SandboxedExecutor,
    pub classifier: Arc<CommandSafetyClassifier>,
    pub output_tx: mpsc::Sender<ToolEvent>,
    pub cancel: CancellationToken,
    pub default_timeout: Duration,
    pub max_output_bytes: usize,
}

impl ToolCtx {
    /// Progress sink that tags streamed output with this call's id.
    #[must_use]
    pub fn progress(&self) -> ProgressSink {
        ProgressSink::new(self.output_tx.clone(), self.tool_call_id.clone())
    }
}

/// Tool-specific timeout configuration.
#[derive(Debug, Clone, Copy)]
pub struct ToolTimeouts {
    pub default_timeout: Duration,
    pub file_operations_timeout: Duration,
    pub shell_commands_timeout: Duration,
}

/// Aggregated tool settings derived from config.
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub sandbox: PathSandbox,
    pub classifier: Arc<CommandSafetyClassifier>,
    pub executor: SandboxedExecutor,
    pub shell: DetectedShell,
    pub timeouts: ToolTimeouts,
    pub max_output_bytes: usize,
    pub approval_mode: ApprovalMode,
}

impl ToolSettings {
    /// Build the context for one call.
    #[must_use]
    pub fn context_for(
        &self,
        tool_call_id: impl Into<String>,
        output_tx: mpsc::Sender<ToolEvent>,
        cancel: CancellationToken,
    ) -> ToolCtx {
        ToolCtx {
            tool_call_id: tool_call_id.into(),
            sandbox: self.sandbox.clone(),
            working_dir: self.sandbox.working_dir(),
            executor: self.executor.clone(),
            classifier: Arc::clone(&self.classifier),
            output_tx,
            cancel,
            default_timeout: self.timeouts.default_timeout,
            max_output_bytes: self.max_output_bytes,
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Sanitizes environment variables before executing commands.
#[derive(Debug, Clone)]
pub struct EnvSanitizer {
    denylist: globset::GlobSet,
}

impl EnvSanitizer {
    pub fn new(patterns: &[String]) -> Result<Self, ToolError> {
        let mut builder = globset::GlobSetBuilder::new();
        for pat in patterns {
            let mut glob = globset::GlobBuilder::new(pat);
            // Env var names are matched case-insensitively (api_key == API_KEY).
            glob.case_insensitive(true);
            let glob = glob.build().map_err(|e| ToolError::BadArgs {
                message: format!("Invalid env denylist pattern '{pat}': {e}"),
            })?;
            builder.add(glob);
        }
        let set = builder.build().map_err(|e| ToolError::BadArgs {
            message: format!("Invalid env denylist: {e}"),
        })?;
        Ok(Self { denylist: set })
    }

    pub fn with_defaults() -> Result<Self, ToolError> {
        let patterns: Vec<String> = DEFAULT_ENV_DENYLIST
            .iter()
            .map(ToString::to_string)
            .collect();
        Self::new(&patterns)
    }

    #[must_use]
    pub fn is_denied(&self, name: &str) -> bool {
        self.denylist.is_match(name)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Validate arguments against a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ToolError::BadArgs {
        message: format!("Invalid tool schema: {e}"),
    })?;
    let result = validator.validate(args);
    if let Err(err) = result {
        return Err(ToolError::BadArgs {
            message: err.to_string(),
        });
    }
    Ok(())
}

/// Sanitize tool output for terminal display and context inclusion.
#[must_use]
pub fn sanitize_output(output: &str) -> String {
    warden_utils::sanitize_display_text(output)
}

#[cfg(test)]
mod tests {
    use super::{
        ApprovalMode, EnvSanitizer, ToolDescriptor, ToolError, is_valid_tool_name,
        sanitize_output, validate_args,
    };
    use serde_json::json;
    use warden_types::{InteractionClass, ToolStatus};

    #[test]
    fn tool_name_rules() {
        assert!(is_valid_tool_name("deploy"));
        assert!(is_valid_tool_name("run-tests_2"));
        assert!(!is_valid_tool_name(""));
        assert!(!is_valid_tool_name("2fast"));
        assert!(!is_valid_tool_name("has space"));
        assert!(!is_valid_tool_name("../escape"));
        assert!(!is_valid_tool_name(&"a".repeat(65)));
        assert!(is_valid_tool_name(&"a".repeat(64)));
    }

    #[test]
    fn descriptor_rejects_bad_name() {
        let err = ToolDescriptor::new("bad name", "x", json!({"type": "object"}), InteractionClass::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, ToolError::BadArgs { .. }));
    }

    #[test]
    fn approval_mode_effective_classes() {
        use InteractionClass::{Interactive, Mutating, ReadOnly};

        assert_eq!(ApprovalMode::Permissive.effective_class(Mutating, true), Mutating);
        assert_eq!(ApprovalMode::Default.effective_class(Mutating, true), Interactive);
        assert_eq!(ApprovalMode::Default.effective_class(Mutating, false), Mutating);
        assert_eq!(ApprovalMode::Strict.effective_class(Mutating, false), Interactive);
        assert_eq!(ApprovalMode::Strict.effective_class(ReadOnly, false), ReadOnly);
        assert_eq!(ApprovalMode::Permissive.effective_class(Interactive, false), Interactive);
    }

    #[test]
    fn error_status_mapping() {
        let blocked = ToolError::SandboxViolation(super::DenialReason::UnsafePathCharacters);
        assert_eq!(blocked.status(), ToolStatus::Blocked);
        let timeout = ToolError::Timeout {
            tool: "Run".into(),
            elapsed: std::time::Duration::from_secs(1),
        };
        assert_eq!(timeout.status(), ToolStatus::Timeout);
        let unknown = ToolError::UnknownTool { name: "x".into() };
        assert_eq!(unknown.status(), ToolStatus::Error);
    }

    #[test]
    fn validate_args_reports_type_mismatch() {
        let schema = json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        });
        assert!(validate_args(&schema, &json!({"path": "a"})).is_ok());
        assert!(validate_args(&schema, &json!({"path": 3})).is_err());
        assert!(validate_args(&schema, &json!({})).is_err());
    }

    #[test]
    fn sanitize_output_strips_steganographic_chars() {
        assert_eq!(sanitize_output("Hello\u{200B}World"), "HelloWorld");
    }

    #[test]
    fn env_sanitizer_strips_secrets_and_loader_vars() {
        let sanitizer = EnvSanitizer::with_defaults().unwrap();
        let names = [
            "PATH",
            "OPENAI_API_KEY",
            "github_token",
            "LD_PRELOAD",
            "DYLD_INSERT_LIBRARIES",
            "HOME",
        ];
        let kept: Vec<&str> = names
            .into_iter()
            .filter(|name| !sanitizer.is_denied(name))
            .collect();
        assert_eq!(kept, vec!["PATH", "HOME"]);
    }
}
