//! Core domain types for Warden.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod sanitize;
mod text;

pub use sanitize::{is_steganographic_char, is_unsafe_path_char, sanitize_terminal_text};
pub use text::{
    TRUNCATION_MARKER, floor_char_boundary, truncate_bytes_with_marker, truncate_with_ellipsis,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// Tool Definitions
// ============================================================================

/// How a tool interacts with the user and the workspace.
///
/// Drives dispatch: read-only and mutating calls may share a concurrent wave,
/// interactive calls always run alone and wait for human confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionClass {
    #[serde(alias = "read-only")]
    ReadOnly,
    Mutating,
    Interactive,
}

impl InteractionClass {
    #[must_use]
    pub const fn requires_confirmation(self) -> bool {
        matches!(self, Self::Interactive)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::Mutating => "mutating",
            Self::Interactive => "interactive",
        }
    }
}

/// A tool the model may call, as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The name of the tool (function name).
    pub name: String,
    /// A description of what the tool does.
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub parameters: Value,
    pub interaction: InteractionClass,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        interaction: InteractionClass,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            interaction,
        }
    }
}

// ============================================================================
// Tool Calls
// ============================================================================

#[derive(Debug, Error)]
pub enum ArgumentsError {
    #[error("arguments are not valid JSON: {0}")]
    Malformed(String),
    #[error("arguments must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// A tool call requested by the model.
///
/// Arguments are kept exactly as the model emitted them; parsing happens during
/// validation so a malformed payload can be sent back for repair verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call (used to match results).
    pub id: String,
    pub name: String,
    pub raw_arguments: String,
}

impl ToolCall {
    /// Create a tool call from already-structured arguments.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments: arguments.to_string(),
        }
    }

    /// Create a tool call from the raw argument text the model produced.
    pub fn from_raw(
        id: impl Into<String>,
        name: impl Into<String>,
        raw_arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            raw_arguments: raw_arguments.into(),
        }
    }

    /// Parse the raw arguments into a JSON object.
    ///
    /// An empty or whitespace-only payload is treated as `{}`.
    pub fn parse_arguments(&self) -> Result<Value, ArgumentsError> {
        let trimmed = self.raw_arguments.trim();
        if trimmed.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        let value: Value =
            serde_json::from_str(trimmed).map_err(|e| ArgumentsError::Malformed(e.to_string()))?;
        if value.is_object() {
            Ok(value)
        } else {
            Err(ArgumentsError::NotAnObject(json_kind(&value)))
        }
    }

    #[must_use]
    pub fn with_raw_arguments(&self, raw_arguments: impl Into<String>) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            raw_arguments: raw_arguments.into(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tool Results
// ============================================================================

/// Terminal status of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Ok,
    /// Refused by a safety check or by the user; nothing ran.
    Blocked,
    Error,
    Timeout,
    Aborted,
}

impl ToolStatus {
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Blocked => "blocked",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
        }
    }
}

/// Tool output payload: plain text or a structured JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolOutput {
    Text(String),
    Json(Value),
}

impl ToolOutput {
    /// Text rendering used when the output is appended to the conversation.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

impl From<String> for ToolOutput {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for ToolOutput {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// The result of executing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The ID of the tool call this result is for.
    pub tool_call_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    pub output: ToolOutput,
}

impl ToolResult {
    fn with_status(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        status: ToolStatus,
        output: ToolOutput,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            status,
            output,
        }
    }

    pub fn success(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::with_status(
            tool_call_id,
            tool_name,
            ToolStatus::Ok,
            ToolOutput::Text(content.into()),
        )
    }

    pub fn structured(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        value: Value,
    ) -> Self {
        Self::with_status(tool_call_id, tool_name, ToolStatus::Ok, ToolOutput::Json(value))
    }

    pub fn from_output(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: ToolOutput,
    ) -> Self {
        Self::with_status(tool_call_id, tool_name, ToolStatus::Ok, output)
    }

    pub fn failure(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        status: ToolStatus,
        message: impl Into<String>,
    ) -> Self {
        Self::with_status(
            tool_call_id,
            tool_name,
            status,
            ToolOutput::Text(message.into()),
        )
    }

    pub fn blocked(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::failure(tool_call_id, tool_name, ToolStatus::Blocked, reason)
    }

    pub fn error(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::failure(tool_call_id, tool_name, ToolStatus::Error, message)
    }

    pub fn timeout(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::failure(tool_call_id, tool_name, ToolStatus::Timeout, message)
    }

    pub fn aborted(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self::failure(
            tool_call_id,
            tool_name,
            ToolStatus::Aborted,
            "Cancelled by user",
        )
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        !self.status.is_ok()
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// One entry of the conversation the orchestrator maintains for a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        text: String,
    },
    Assistant {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool(ToolResult),
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            text: text.into(),
            tool_calls,
        }
    }

    #[must_use]
    pub fn tool_result(&self) -> Option<&ToolResult> {
        match self {
            Self::Tool(result) => Some(result),
            _ => None,
        }
    }
}
