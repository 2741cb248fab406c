//! Warden engine: the tool orchestration loop and the configuration that
//! feeds it.
//!
//! The model, UI and human approver are reached only through the traits in
//! [`collaborators`].

pub mod bootstrap;
pub mod cancel;
pub mod collaborators;
pub mod config;
pub mod orchestrator;

pub use bootstrap::{ToolSession, bootstrap, build_settings};
pub use cancel::TurnCancellation;
pub use collaborators::{
    ApprovalFut, Approver, EventSink, FixedApprover, LogEventSink, ModelClient, ModelError,
    ModelFut, ModelTurn, RepairRequest, StdinApprover, TurnRequest,
};
pub use config::{ConfigError, WardenConfig};
pub use orchestrator::{
    DEFAULT_MAX_ITERATIONS_PER_TURN, EngineError, ToolOrchestrator, TurnOutcome, TurnPhase, Wave,
    plan_waves,
};

pub use warden_tools::{ApprovalDecision, ConfirmationRequest, ToolEvent, ToolEventKind};
pub use warden_types::{Message, ToolCall, ToolOutput, ToolResult, ToolStatus};
