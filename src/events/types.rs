// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Event envelope and payload types.
//!
//! On the wire every event is a flat JSON object:
//!
//! ```json
//! {"type":"tool_call","sessionId":"s1","iterationId":"it-1",
//!  "timestamp":"2026-01-01T00:00:00Z","data":{"toolName":"grep", ...}}
//! ```
//!
//! In memory the `type`/`data` pair becomes one [`EventPayload`] variant, so
//! every consumer matches exhaustively on the kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Event Kinds
// ============================================================================

/// The closed set of event tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    IterationStart,
    IterationEnd,
    ToolCall,
    LlmUsage,
    GitOperation,
    TestResult,
    FileEdit,
    UserMessage,
    StreamingTokenUsage,
    StreamingToolStart,
    StreamingToolFinish,
}

impl EventKind {
    /// Get the wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::IterationStart => "iteration_start",
            EventKind::IterationEnd => "iteration_end",
            EventKind::ToolCall => "tool_call",
            EventKind::LlmUsage => "llm_usage",
            EventKind::GitOperation => "git_operation",
            EventKind::TestResult => "test_result",
            EventKind::FileEdit => "file_edit",
            EventKind::UserMessage => "user_message",
            EventKind::StreamingTokenUsage => "streaming_token_usage",
            EventKind::StreamingToolStart => "streaming_tool_start",
            EventKind::StreamingToolFinish => "streaming_tool_finish",
        }
    }

    /// High-frequency kinds that the streaming sink batches.
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            EventKind::StreamingTokenUsage
                | EventKind::StreamingToolStart
                | EventKind::StreamingToolFinish
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Enumerated Fields
// ============================================================================

/// Final status of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IterationStatus {
    Success,
    Failed,
    AwaitingInput,
}

impl IterationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IterationStatus::Success => "success",
            IterationStatus::Failed => "failed",
            IterationStatus::AwaitingInput => "awaiting-input",
        }
    }
}

impl std::fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IterationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(IterationStatus::Success),
            "failed" => Ok(IterationStatus::Failed),
            "awaiting-input" => Ok(IterationStatus::AwaitingInput),
            _ => Err(ParseEnumError(s.to_string())),
        }
    }
}

/// Wrapped git operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitOperationKind {
    Commit,
    Merge,
    Rebase,
    Checkout,
}

impl GitOperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitOperationKind::Commit => "commit",
            GitOperationKind::Merge => "merge",
            GitOperationKind::Rebase => "rebase",
            GitOperationKind::Checkout => "checkout",
        }
    }
}

impl std::fmt::Display for GitOperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of file edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEditType {
    Create,
    Modify,
    Delete,
}

impl FileEditType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileEditType::Create => "create",
            FileEditType::Modify => "modify",
            FileEditType::Delete => "delete",
        }
    }
}

/// Error type for parsing string-backed enums.
#[derive(Debug, Clone)]
pub struct ParseEnumError(pub String);

impl std::fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown value: {}", self.0)
    }
}

impl std::error::Error for ParseEnumError {}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationStartData {
    pub iteration_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_sha_start: Option<String>,
}

/// End-of-iteration facts.
///
/// Cost and diff totals are not carried here: the relational sink derives
/// them from the child rows already recorded for the iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationEndData {
    pub status: IterationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_sha_end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallData {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub cost_usd: f64,
}

/// Token usage for one LLM call.
///
/// When `cost_usd` is absent the relational sink prices the call itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmUsageData {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitOperationData {
    pub operation: GitOperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub files_changed: u64,
    pub insertions: u64,
    pub deletions: u64,
    pub conflicted: bool,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultData {
    pub framework: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,
    pub passed: u32,
    pub failed: u32,
    #[serde(default)]
    pub skipped: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEditData {
    pub file_path: String,
    pub edit_type: FileEditType,
    #[serde(default)]
    pub lines_added: u64,
    #[serde(default)]
    pub lines_removed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessageData {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingTokenUsageData {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingToolStartData {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingToolFinishData {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Kind-specific payload of a [`MetricEvent`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    IterationStart(IterationStartData),
    IterationEnd(IterationEndData),
    ToolCall(ToolCallData),
    LlmUsage(LlmUsageData),
    GitOperation(GitOperationData),
    TestResult(TestResultData),
    FileEdit(FileEditData),
    UserMessage(UserMessageData),
    StreamingTokenUsage(StreamingTokenUsageData),
    StreamingToolStart(StreamingToolStartData),
    StreamingToolFinish(StreamingToolFinishData),
}

impl EventPayload {
    /// Get the tag for this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::IterationStart(_) => EventKind::IterationStart,
            EventPayload::IterationEnd(_) => EventKind::IterationEnd,
            EventPayload::ToolCall(_) => EventKind::ToolCall,
            EventPayload::LlmUsage(_) => EventKind::LlmUsage,
            EventPayload::GitOperation(_) => EventKind::GitOperation,
            EventPayload::TestResult(_) => EventKind::TestResult,
            EventPayload::FileEdit(_) => EventKind::FileEdit,
            EventPayload::UserMessage(_) => EventKind::UserMessage,
            EventPayload::StreamingTokenUsage(_) => EventKind::StreamingTokenUsage,
            EventPayload::StreamingToolStart(_) => EventKind::StreamingToolStart,
            EventPayload::StreamingToolFinish(_) => EventKind::StreamingToolFinish,
        }
    }

    fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            EventPayload::IterationStart(d) => serde_json::to_value(d),
            EventPayload::IterationEnd(d) => serde_json::to_value(d),
            EventPayload::ToolCall(d) => serde_json::to_value(d),
            EventPayload::LlmUsage(d) => serde_json::to_value(d),
            EventPayload::GitOperation(d) => serde_json::to_value(d),
            EventPayload::TestResult(d) => serde_json::to_value(d),
            EventPayload::FileEdit(d) => serde_json::to_value(d),
            EventPayload::UserMessage(d) => serde_json::to_value(d),
            EventPayload::StreamingTokenUsage(d) => serde_json::to_value(d),
            EventPayload::StreamingToolStart(d) => serde_json::to_value(d),
            EventPayload::StreamingToolFinish(d) => serde_json::to_value(d),
        }
    }

    fn from_value(kind: EventKind, data: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EventKind::IterationStart => EventPayload::IterationStart(serde_json::from_value(data)?),
            EventKind::IterationEnd => EventPayload::IterationEnd(serde_json::from_value(data)?),
            EventKind::ToolCall => EventPayload::ToolCall(serde_json::from_value(data)?),
            EventKind::LlmUsage => EventPayload::LlmUsage(serde_json::from_value(data)?),
            EventKind::GitOperation => EventPayload::GitOperation(serde_json::from_value(data)?),
            EventKind::TestResult => EventPayload::TestResult(serde_json::from_value(data)?),
            EventKind::FileEdit => EventPayload::FileEdit(serde_json::from_value(data)?),
            EventKind::UserMessage => EventPayload::UserMessage(serde_json::from_value(data)?),
            EventKind::StreamingTokenUsage => {
                EventPayload::StreamingTokenUsage(serde_json::from_value(data)?)
            }
            EventKind::StreamingToolStart => {
                EventPayload::StreamingToolStart(serde_json::from_value(data)?)
            }
            EventKind::StreamingToolFinish => {
                EventPayload::StreamingToolFinish(serde_json::from_value(data)?)
            }
        })
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// The universal event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub struct MetricEvent {
    pub session_id: String,
    pub iteration_id: Option<String>,
    /// Stamped by the bus when absent.
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: EventPayload,
}

impl MetricEvent {
    /// Create a session-scoped event.
    pub fn new(session_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            session_id: session_id.into(),
            iteration_id: None,
            timestamp: None,
            payload,
        }
    }

    /// Attach the owning iteration.
    pub fn with_iteration(mut self, iteration_id: impl Into<String>) -> Self {
        self.iteration_id = Some(iteration_id.into());
        self
    }

    /// Set an explicit timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Timestamp, or now if the event was never stamped.
    pub fn timestamp_or_now(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(Utc::now)
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(rename = "type")]
    kind: EventKind,
    session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iteration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    data: serde_json::Value,
}

impl TryFrom<WireEvent> for MetricEvent {
    type Error = serde_json::Error;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            payload: EventPayload::from_value(wire.kind, wire.data)?,
            session_id: wire.session_id,
            iteration_id: wire.iteration_id,
            timestamp: wire.timestamp,
        })
    }
}

impl From<MetricEvent> for WireEvent {
    fn from(event: MetricEvent) -> Self {
        let kind = event.kind();
        // Payload structs contain only JSON-representable fields.
        let data = event.payload.to_value().unwrap_or(serde_json::Value::Null);
        Self {
            kind,
            session_id: event.session_id,
            iteration_id: event.iteration_id,
            timestamp: event.timestamp,
            data,
        }
    }
}
