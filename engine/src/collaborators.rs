//! Interfaces to the collaborators around the orchestrator: the model, the
//! UI event sink and the human approver.

use std::future::Future;
use std::io::{BufRead, Write};
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use warden_tools::{ApprovalDecision, ConfirmationRequest, ToolEvent, ToolEventKind};
use warden_types::{Message, ToolCall, ToolDefinition};

/// Model future type alias.
pub type ModelFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, ModelError>> + Send + 'a>>;

/// Approval future type alias.
pub type ApprovalFut<'a> = Pin<Box<dyn Future<Output = ApprovalDecision> + Send + 'a>>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ModelError {
    #[error("Model request failed: {0}")]
    Request(String),
    #[error("Model request cancelled")]
    Cancelled,
}

/// Everything the model needs for one completion.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// One model response: assistant text plus any requested tool calls.
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Ask the model to re-emit arguments for a call that failed validation.
#[derive(Debug, Clone)]
pub struct RepairRequest {
    pub call: ToolCall,
    /// Schema the arguments must satisfy.
    pub schema: Value,
    /// Why the original arguments were rejected.
    pub error: String,
}

/// Chat-completion engine.
pub trait ModelClient: Send + Sync {
    /// Stream text deltas into `deltas` and return the completed turn.
    fn complete<'a>(
        &'a self,
        request: TurnRequest,
        deltas: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> ModelFut<'a, ModelTurn>;

    /// Return replacement raw arguments for `request.call`.
    fn repair_arguments<'a>(
        &'a self,
        request: RepairRequest,
        cancel: CancellationToken,
    ) -> ModelFut<'a, String>;
}

/// Consumer of tool lifecycle events (the UI).
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ToolEvent);
}

/// Human confirmation for interactive calls.
pub trait Approver: Send + Sync {
    fn confirm<'a>(&'a self, request: ConfirmationRequest) -> ApprovalFut<'a>;
}

// ============================================================================
// Simple implementations
// ============================================================================

/// Writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: ToolEvent) {
        match &event.kind {
            ToolEventKind::Init {
                tool_name,
                description,
            } => {
                tracing::info!(call_id = %event.tool_call_id, tool = %tool_name, %description, "Tool started");
            }
            ToolEventKind::Update { text, .. } => {
                tracing::debug!(call_id = %event.tool_call_id, %text, "Tool output");
            }
            ToolEventKind::Completion { summary } => {
                tracing::info!(call_id = %event.tool_call_id, %summary, "Tool completed");
            }
            ToolEventKind::Error { status, message } => {
                tracing::warn!(
                    call_id = %event.tool_call_id,
                    status = status.as_str(),
                    %message,
                    "Tool failed"
                );
            }
        }
    }
}

/// Answers every confirmation the same way.
#[derive(Debug, Clone)]
pub struct FixedApprover(pub ApprovalDecision);

impl Approver for FixedApprover {
    fn confirm<'a>(&'a self, request: ConfirmationRequest) -> ApprovalFut<'a> {
        Box::pin(async move {
            tracing::info!(
                tool = %request.tool_name,
                decision = ?self.0,
                "Confirmation answered by policy"
            );
            self.0.clone()
        })
    }
}

/// Prompts on the controlling terminal. Anything other than `y`/`yes` denies.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinApprover;

impl Approver for StdinApprover {
    fn confirm<'a>(&'a self, request: ConfirmationRequest) -> ApprovalFut<'a> {
        Box::pin(async move {
            let prompt = format!("{} wants to: {}\nAllow? [y/N] ", request.tool_name, request.summary);
            let answer = tokio::task::spawn_blocking(move || {
                let mut stderr = std::io::stderr();
                let _ = stderr.write_all(prompt.as_bytes());
                let _ = stderr.flush();
                let mut line = String::new();
                std::io::stdin().lock().read_line(&mut line).map(|_| line)
            })
            .await;

            match answer {
                Ok(Ok(line)) if is_affirmative(&line) => ApprovalDecision::Approve,
                Ok(Ok(_)) => ApprovalDecision::Deny,
                Ok(Err(e)) => {
                    tracing::warn!("Failed to read confirmation: {e}");
                    ApprovalDecision::Deny
                }
                Err(e) => {
                    tracing::warn!("Confirmation prompt task failed: {e}");
                    ApprovalDecision::Deny
                }
            }
        })
    }
}

fn is_affirmative(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
