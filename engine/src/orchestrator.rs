//! Tool orchestration loop.
//!
//! Maps model tool-call requests onto registered tools: validates and repairs
//! arguments, plans waves, asks for confirmation, runs calls under per-call
//! timeouts and the turn's cancellation token, and hands results back in
//! request order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::mpsc;
use warden_tools::{
    ApprovalDecision, ConfirmationRequest, DenialReason, RegisteredTool, ToolError, ToolEvent,
    ToolEventKind, ToolRegistry, ToolSettings, ToolTimeouts, sanitize_output, validate_args,
};
use warden_types::{
    InteractionClass, Message, ToolCall, ToolOutput, ToolResult, truncate_bytes_with_marker,
    truncate_with_ellipsis,
};

use crate::cancel::TurnCancellation;
use crate::collaborators::{
    Approver, EventSink, ModelClient, ModelError, ModelTurn, RepairRequest, TurnRequest,
};

/// Upper bound on model round-trips that request tools within one user turn.
pub const DEFAULT_MAX_ITERATIONS_PER_TURN: u32 = 25;

/// Buffered progress events per call before updates are dropped.
pub const TOOL_EVENT_CHANNEL_CAPACITY: usize = 256;

const SUMMARY_MAX_CHARS: usize = 120;

/// Where the orchestrator is within a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    AwaitingModel,
    DispatchingCalls,
    RepairAttempt,
    Cancelled,
}

impl TurnPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingModel => "awaiting_model",
            Self::DispatchingCalls => "dispatching_calls",
            Self::RepairAttempt => "repair_attempt",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without requesting more tools.
    Completed { text: String, iterations: u32 },
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Tool iteration limit reached ({limit} rounds in one turn)")]
    IterationLimit { limit: u32 },
}

/// A group of calls that run together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wave {
    /// Non-interactive calls, run concurrently.
    Concurrent(Vec<usize>),
    /// One interactive call, run alone after confirmation.
    Serial(usize),
}

/// Split calls into waves preserving request order.
///
/// Consecutive non-interactive calls share a wave; each interactive call
/// gets its own and later waves wait for it.
#[must_use]
pub fn plan_waves(classes: &[InteractionClass]) -> Vec<Wave> {
    let mut waves = Vec::new();
    let mut pending = Vec::new();
    for (idx, class) in classes.iter().enumerate() {
        if class.requires_confirmation() {
            if !pending.is_empty() {
                waves.push(Wave::Concurrent(std::mem::take(&mut pending)));
            }
            waves.push(Wave::Serial(idx));
        } else {
            pending.push(idx);
        }
    }
    if !pending.is_empty() {
        waves.push(Wave::Concurrent(pending));
    }
    waves
}

/// Drives tool calls for one conversation.
pub struct ToolOrchestrator {
    registry: Arc<ToolRegistry>,
    settings: ToolSettings,
    events: Arc<dyn EventSink>,
    approver: Arc<dyn Approver>,
    max_iterations_per_turn: u32,
    phase: TurnPhase,
}

impl std::fmt::Debug for ToolOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolOrchestrator")
            .field("tools", &self.registry.len())
            .field("max_iterations_per_turn", &self.max_iterations_per_turn)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl ToolOrchestrator {
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        settings: ToolSettings,
        events: Arc<dyn EventSink>,
        approver: Arc<dyn Approver>,
    ) -> Self {
        Self {
            registry,
            settings,
            events,
            approver,
            max_iterations_per_turn: DEFAULT_MAX_ITERATIONS_PER_TURN,
            phase: TurnPhase::Idle,
        }
    }

    #[must_use]
    pub fn with_max_iterations(mut self, limit: u32) -> Self {
        self.max_iterations_per_turn = limit.max(1);
        self
    }

    #[must_use]
    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn set_phase(&mut self, next: TurnPhase) {
        if self.phase != next {
            tracing::debug!(from = self.phase.as_str(), to = next.as_str(), "Turn phase");
            self.phase = next;
        }
    }

    /// Run one user turn: alternate model completions and tool dispatch until
    /// the model stops asking for tools, the turn is cancelled, or the
    /// iteration limit is hit.
    ///
    /// Assistant messages and tool results are appended to `conversation` as
    /// they are produced, so it stays consistent even when this returns an error.
    pub async fn run_turn(
        &mut self,
        conversation: &mut Vec<Message>,
        model: &dyn ModelClient,
        deltas: mpsc::Sender<String>,
        cancel: &TurnCancellation,
    ) -> Result<TurnOutcome, EngineError> {
        self.set_phase(TurnPhase::Idle);
        let mut iterations = 0u32;

        loop {
            if cancel.is_cancelled() {
                self.set_phase(TurnPhase::Cancelled);
                return Ok(TurnOutcome::Cancelled);
            }

            self.set_phase(TurnPhase::AwaitingModel);
            let request = TurnRequest {
                messages: conversation.clone(),
                tools: self.registry.definitions(),
            };
            let completion = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(ModelError::Cancelled),
                result = model.complete(request, deltas.clone(), cancel.token()) => result,
            };
            let ModelTurn { text, tool_calls } = match completion {
                Ok(turn) => turn,
                Err(ModelError::Cancelled) => {
                    self.set_phase(TurnPhase::Cancelled);
                    return Ok(TurnOutcome::Cancelled);
                }
                Err(e) => {
                    tracing::warn!("Model request failed: {e}");
                    self.set_phase(TurnPhase::Idle);
                    return Err(e.into());
                }
            };

            conversation.push(Message::assistant(text.clone(), tool_calls.clone()));
            if tool_calls.is_empty() {
                self.set_phase(TurnPhase::Idle);
                return Ok(TurnOutcome::Completed { text, iterations });
            }

            if iterations >= self.max_iterations_per_turn {
                let limit = self.max_iterations_per_turn;
                tracing::warn!(limit, "Tool iteration limit reached");
                let message = format!("Tool iteration limit reached ({limit} rounds); call not run");
                for call in &tool_calls {
                    self.events
                        .emit(ToolEvent::init(&call.id, &call.name, call.name.as_str()));
                    let result = ToolResult::error(&call.id, &call.name, message.as_str());
                    emit_terminal(self.events.as_ref(), &result);
                    conversation.push(Message::Tool(result));
                }
                self.set_phase(TurnPhase::Idle);
                return Err(EngineError::IterationLimit { limit });
            }
            iterations += 1;

            let results = self.dispatch(&tool_calls, Some(model), cancel).await;
            conversation.extend(results.into_iter().map(Message::Tool));

            if cancel.is_cancelled() {
                self.set_phase(TurnPhase::Cancelled);
                return Ok(TurnOutcome::Cancelled);
            }
        }
    }

    /// Execute one batch of calls and return their results in request order.
    ///
    /// Without a `model`, invalid arguments are a hard error instead of
    /// triggering a repair round-trip.
    pub async fn dispatch(
        &mut self,
        calls: &[ToolCall],
        model: Option<&dyn ModelClient>,
        cancel: &TurnCancellation,
    ) -> Vec<ToolResult> {
        self.set_phase(TurnPhase::DispatchingCalls);
        let registry = Arc::clone(&self.registry);
        let events = Arc::clone(&self.events);
        let approver = Arc::clone(&self.approver);
        let settings = self.settings.clone();
        let dispatcher = Dispatcher {
            registry: &registry,
            settings: &settings,
            events: events.as_ref(),
            approver: approver.as_ref(),
            cancel,
        };

        let mut prepared: Vec<Prepared<'_>> = calls.iter().map(|call| dispatcher.prepare(call)).collect();

        let repairs: Vec<usize> = prepared
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| matches!(p, Prepared::NeedsRepair { .. }).then_some(idx))
            .collect();
        if !repairs.is_empty() {
            self.set_phase(TurnPhase::RepairAttempt);
            let repaired = join_all(repairs.iter().map(|&idx| {
                dispatcher.repair(&calls[idx], &prepared[idx], model)
            }))
            .await;
            for (idx, outcome) in repairs.into_iter().zip(repaired) {
                prepared[idx] = outcome;
            }
            self.set_phase(TurnPhase::DispatchingCalls);
        }

        let mut results: Vec<Option<ToolResult>> = vec![None; calls.len()];
        let mut ready = Vec::new();
        for (idx, (call, prep)) in calls.iter().zip(prepared).enumerate() {
            match prep {
                Prepared::Ready { tool, args } => {
                    let description = tool
                        .approval_summary(&args)
                        .unwrap_or_else(|_| tool.descriptor().description().to_string());
                    dispatcher.emit_init(call, &description);
                    ready.push(ReadyCall {
                        index: idx,
                        call,
                        tool,
                        args,
                    });
                }
                Prepared::Rejected(err) => {
                    dispatcher.emit_init(call, &call.name);
                    results[idx] = Some(dispatcher.finish(tool_error_result(call, err)));
                }
                Prepared::NeedsRepair { error, .. } => {
                    // Only reachable if the repair pass was skipped.
                    dispatcher.emit_init(call, &call.name);
                    let err = ToolError::BadArgs { message: error };
                    results[idx] = Some(dispatcher.finish(tool_error_result(call, err)));
                }
            }
        }

        let classes: Vec<InteractionClass> = ready
            .iter()
            .map(|r| r.tool.descriptor().interaction())
            .collect();
        for wave in plan_waves(&classes) {
            let members = match &wave {
                Wave::Concurrent(members) => members.clone(),
                Wave::Serial(member) => vec![*member],
            };

            if cancel.is_cancelled() {
                for &member in &members {
                    let r = &ready[member];
                    results[r.index] = Some(dispatcher.finish(ToolResult::aborted(&r.call.id, &r.call.name)));
                }
                continue;
            }

            match wave {
                Wave::Concurrent(members) => {
                    let finished = join_all(members.iter().map(|&m| dispatcher.run(&ready[m]))).await;
                    for (member, result) in members.into_iter().zip(finished) {
                        results[ready[member].index] = Some(result);
                    }
                }
                Wave::Serial(member) => {
                    let r = &ready[member];
                    let result = dispatcher.confirm_and_run(r).await;
                    results[r.index] = Some(result);
                }
            }
        }

        if cancel.is_cancelled() {
            self.set_phase(TurnPhase::Cancelled);
        }

        results
            .into_iter()
            .zip(calls)
            .map(|(result, call)| {
                result.unwrap_or_else(|| ToolResult::error(&call.id, &call.name, "Tool call was not dispatched"))
            })
            .collect()
    }
}

// ============================================================================
// Dispatch internals
// ============================================================================

enum Prepared<'r> {
    Ready {
        tool: &'r RegisteredTool,
        args: Value,
    },
    NeedsRepair {
        tool: &'r RegisteredTool,
        error: String,
    },
    Rejected(ToolError),
}

struct ReadyCall<'c, 'r> {
    index: usize,
    call: &'c ToolCall,
    tool: &'r RegisteredTool,
    args: Value,
}

enum RunOutcome {
    Finished(Result<ToolOutput, ToolError>),
    Panicked(String),
    TimedOut(Duration),
    Aborted,
}

struct Dispatcher<'a> {
    registry: &'a ToolRegistry,
    settings: &'a ToolSettings,
    events: &'a dyn EventSink,
    approver: &'a dyn Approver,
    cancel: &'a TurnCancellation,
}

impl<'a> Dispatcher<'a> {
    fn prepare(&self, call: &ToolCall) -> Prepared<'a> {
        let tool = match self.registry.lookup(&call.name) {
            Ok(tool) => tool,
            Err(err) => {
                tracing::warn!(tool = %call.name, "Model requested unknown tool");
                return Prepared::Rejected(err);
            }
        };
        match parse_and_validate(tool, call) {
            Ok(args) => Prepared::Ready { tool, args },
            Err(error) => Prepared::NeedsRepair { tool, error },
        }
    }

    async fn repair(
        &self,
        call: &ToolCall,
        prepared: &Prepared<'a>,
        model: Option<&dyn ModelClient>,
    ) -> Prepared<'a> {
        let Prepared::NeedsRepair { tool, error } = prepared else {
            return Prepared::Rejected(ToolError::BadArgs {
                message: "internal: repair requested for a valid call".to_string(),
            });
        };
        let tool = *tool;
        let Some(model) = model else {
            return Prepared::Rejected(ToolError::BadArgs {
                message: error.clone(),
            });
        };

        tracing::info!(call_id = %call.id, tool = %call.name, %error, "Requesting argument repair");
        let request = RepairRequest {
            call: call.clone(),
            schema: tool.descriptor().input_schema().clone(),
            error: error.clone(),
        };
        let response = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ModelError::Cancelled),
            raw = model.repair_arguments(request, self.cancel.token()) => raw,
        };

        match response {
            Ok(raw) => {
                let repaired = call.with_raw_arguments(raw);
                match parse_and_validate(tool, &repaired) {
                    Ok(args) => {
                        tracing::info!(call_id = %call.id, "Argument repair succeeded");
                        Prepared::Ready { tool, args }
                    }
                    Err(second) => Prepared::Rejected(ToolError::BadArgs {
                        message: format!("arguments still invalid after repair: {second}"),
                    }),
                }
            }
            Err(ModelError::Cancelled) => Prepared::Rejected(ToolError::Aborted {
                tool: call.name.clone(),
            }),
            Err(e) => Prepared::Rejected(ToolError::BadArgs {
                message: format!("{error} (repair failed: {e})"),
            }),
        }
    }

    async fn confirm_and_run(&self, ready: &ReadyCall<'_, 'a>) -> ToolResult {
        let call = ready.call;
        let summary = ready
            .tool
            .approval_summary(&ready.args)
            .map(|s| sanitize_output(&s))
            .unwrap_or_else(|_| call.name.clone());
        let request = ConfirmationRequest {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            summary,
            arguments: ready.args.clone(),
        };

        let decision = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            decision = self.approver.confirm(request) => Some(decision),
        };
        match decision {
            None => self.finish(ToolResult::aborted(&call.id, &call.name)),
            Some(ApprovalDecision::Deny) => {
                tracing::info!(call_id = %call.id, tool = %call.name, "Tool call denied");
                let err = ToolError::SandboxViolation(DenialReason::UserDenied {
                    tool: call.name.clone(),
                });
                self.finish(tool_error_result(call, err))
            }
            Some(ApprovalDecision::Approve) => self.run(ready).await,
        }
    }

    /// Execute a validated call, forwarding its progress events, and emit its
    /// terminal event.
    async fn run(&self, ready: &ReadyCall<'_, 'a>) -> ToolResult {
        let call = ready.call;
        let (tx, mut rx) = mpsc::channel(TOOL_EVENT_CHANNEL_CAPACITY);
        let token = self.cancel.token();
        let mut ctx = self.settings.context_for(&call.id, tx, token.clone());
        ctx.default_timeout = default_timeout_for(&call.name, &self.settings.timeouts);
        let timeout = ready.tool.timeout().unwrap_or(ctx.default_timeout);
        let max_output_bytes = ctx.max_output_bytes;

        let args = ready.args.clone();
        let tool = ready.tool;
        let run = async {
            let exec = AssertUnwindSafe(tool.execute(args, &mut ctx)).catch_unwind();
            tokio::select! {
                biased;
                () = token.cancelled() => RunOutcome::Aborted,
                outcome = tokio::time::timeout(timeout, exec) => match outcome {
                    Err(_) => RunOutcome::TimedOut(timeout),
                    Ok(Err(payload)) => RunOutcome::Panicked(panic_payload_to_string(&payload)),
                    Ok(Ok(result)) => RunOutcome::Finished(result),
                },
            }
        };
        tokio::pin!(run);

        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                Some(event) = rx.recv() => self.forward(event),
            }
        };
        while let Ok(event) = rx.try_recv() {
            self.forward(event);
        }

        let result = match outcome {
            RunOutcome::Finished(Ok(ToolOutput::Text(text))) => {
                let bounded = truncate_bytes_with_marker(sanitize_output(&text), max_output_bytes);
                ToolResult::success(&call.id, &call.name, bounded)
            }
            RunOutcome::Finished(Ok(output @ ToolOutput::Json(_))) => {
                ToolResult::from_output(&call.id, &call.name, output)
            }
            RunOutcome::Finished(Err(err)) => tool_error_result(call, err),
            RunOutcome::Panicked(message) => {
                tracing::error!(call_id = %call.id, tool = %call.name, %message, "Tool panicked");
                ToolResult::error(
                    &call.id,
                    &call.name,
                    sanitize_output(&format!("Tool panicked: {message}")),
                )
            }
            RunOutcome::TimedOut(elapsed) => {
                tracing::warn!(call_id = %call.id, tool = %call.name, ?elapsed, "Tool timed out");
                tool_error_result(
                    call,
                    ToolError::Timeout {
                        tool: call.name.clone(),
                        elapsed,
                    },
                )
            }
            RunOutcome::Aborted => ToolResult::aborted(&call.id, &call.name),
        };
        self.finish(result)
    }

    /// Only progress updates pass through; lifecycle events are ours to emit.
    fn forward(&self, event: ToolEvent) {
        if matches!(event.kind, ToolEventKind::Update { .. }) {
            self.events.emit(event);
        }
    }

    fn emit_init(&self, call: &ToolCall, description: &str) {
        self.events
            .emit(ToolEvent::init(&call.id, &call.name, description));
    }

    fn finish(&self, result: ToolResult) -> ToolResult {
        emit_terminal(self.events, &result);
        result
    }
}

fn parse_and_validate(tool: &RegisteredTool, call: &ToolCall) -> Result<Value, String> {
    let args = call.parse_arguments().map_err(|e| e.to_string())?;
    validate_args(tool.descriptor().input_schema(), &args).map_err(|e| match e {
        ToolError::BadArgs { message } => message,
        other => other.to_string(),
    })?;
    Ok(args)
}

fn default_timeout_for(name: &str, timeouts: &ToolTimeouts) -> Duration {
    match name {
        "Read" | "List" | "Write" => timeouts.file_operations_timeout,
        "Run" => timeouts.shell_commands_timeout,
        _ => timeouts.default_timeout,
    }
}

fn emit_terminal(events: &dyn EventSink, result: &ToolResult) {
    let kind = if result.status.is_ok() {
        ToolEventKind::Completion {
            summary: completion_summary(&result.output),
        }
    } else {
        ToolEventKind::Error {
            status: result.status,
            message: result.output.to_text(),
        }
    };
    events.emit(ToolEvent {
        tool_call_id: result.tool_call_id.clone(),
        kind,
    });
}

fn completion_summary(output: &ToolOutput) -> String {
    match output {
        ToolOutput::Text(text) => {
            let first = text.lines().next().unwrap_or_default();
            truncate_with_ellipsis(first, SUMMARY_MAX_CHARS)
        }
        ToolOutput::Json(_) => "structured output".to_string(),
    }
}

/// Convert a tool error into the result the model sees.
pub(crate) fn tool_error_result(call: &ToolCall, err: ToolError) -> ToolResult {
    let status = err.status();
    let message = match err {
        ToolError::BadArgs { message } => format!("Bad args: {message}"),
        ToolError::Timeout { tool, elapsed } => {
            format!("Tool '{tool}' timed out after {}s", elapsed.as_secs())
        }
        ToolError::SandboxViolation(reason) => reason.to_string(),
        ToolError::CommandBlocked(verdict) => verdict.to_string(),
        ToolError::NotFound { path } => format!("Not found: {}", path.display()),
        ToolError::ExecutionFailed { tool, message } => format!("{tool} failed: {message}"),
        ToolError::Aborted { .. } => "Cancelled by user".to_string(),
        ToolError::UnknownTool { name } => format!("Unknown tool: {name}"),
        ToolError::DuplicateTool { name } => format!("Duplicate tool: {name}"),
        err @ ToolError::Discovery { .. } => err.to_string(),
    };

    ToolResult::failure(&call.id, &call.name, status, sanitize_output(&message))
}

fn panic_payload_to_string(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use warden_types::ToolStatus;

    #[test]
    fn waves_split_on_interactive_calls() {
        use InteractionClass::{Interactive, Mutating, ReadOnly};

        assert_eq!(
            plan_waves(&[ReadOnly, Mutating, Interactive, ReadOnly, Interactive, Interactive]),
            vec![
                Wave::Concurrent(vec![0, 1]),
                Wave::Serial(2),
                Wave::Concurrent(vec![3]),
                Wave::Serial(4),
                Wave::Serial(5),
            ]
        );
        assert_eq!(plan_waves(&[]), Vec::<Wave>::new());
        assert_eq!(
            plan_waves(&[Mutating, Mutating]),
            vec![Wave::Concurrent(vec![0, 1])]
        );
    }

    #[test]
    fn error_results_carry_status() {
        let call = ToolCall::from_raw("c1", "Read", "{}");

        let not_found = tool_error_result(
            &call,
            ToolError::NotFound {
                path: PathBuf::from("/w/missing.txt"),
            },
        );
        assert_eq!(not_found.status, ToolStatus::Error);
        assert_eq!(not_found.output.to_text(), "Not found: /w/missing.txt");

        let denied = tool_error_result(
            &call,
            ToolError::SandboxViolation(DenialReason::UserDenied {
                tool: "Read".into(),
            }),
        );
        assert_eq!(denied.status, ToolStatus::Blocked);

        let timed_out = tool_error_result(
            &call,
            ToolError::Timeout {
                tool: "Read".into(),
                elapsed: Duration::from_secs(7),
            },
        );
        assert_eq!(timed_out.status, ToolStatus::Timeout);
        assert_eq!(timed_out.output.to_text(), "Tool 'Read' timed out after 7s");
    }

    #[test]
    fn default_timeouts_by_tool() {
        let timeouts = ToolTimeouts {
            default_timeout: Duration::from_secs(1),
            file_operations_timeout: Duration::from_secs(2),
            shell_commands_timeout: Duration::from_secs(3),
        };
        assert_eq!(default_timeout_for("Write", &timeouts), Duration::from_secs(2));
        assert_eq!(default_timeout_for("Run", &timeouts), Duration::from_secs(3));
        assert_eq!(default_timeout_for("deploy", &timeouts), Duration::from_secs(1));
    }

    #[test]
    fn summary_uses_first_line() {
        let summary = completion_summary(&ToolOutput::Text("first line\nsecond".into()));
        assert_eq!(summary, "first line");
        let long = "x".repeat(500);
        assert_eq!(
            completion_summary(&ToolOutput::Text(long)).chars().count(),
            SUMMARY_MAX_CHARS
        );
    }

    #[test]
    fn panic_payloads() {
        let s: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_payload_to_string(&s), "boom");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_payload_to_string(&owned), "bang");
        let other: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_payload_to_string(&other), "unknown panic");
    }
}
