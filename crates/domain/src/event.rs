//! The task event taxonomy — one atom in a task's append-only log.
//!
//! Events are assigned dense, monotonically increasing ids by the event
//! store (starting at 1). The same enum is used for the JSONL log, the
//! in-memory listener queues, and the SSE wire: the stored record shape
//! is `{"id": N, "event": {...}}` with the type embedded in the event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Agent session id learned.
    Session { session_id: String },

    /// Low-level progress hint (also carries thinking output).
    Progress { text: String },

    /// Beginning of a text block ("card").
    TextStart { card_id: String },

    /// Full text of that block — the SDK does not chunk within a card.
    TextDelta { card_id: String, text: String },

    /// End of a text block.
    TextEnd { card_id: String },

    /// Tool invocation begins.
    ToolStart {
        card_id: String,
        tool_use_id: String,
        tool_name: String,
        input: Value,
    },

    /// Tool invocation returns.
    ToolResult {
        card_id: String,
        tool_use_id: String,
        tool_name: String,
        result: Value,
        is_error: bool,
    },

    /// Terminal summary from the engine.
    Result {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Opaque paths produced by this turn, surfaced on `complete`.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<String>,
    },

    /// Task reached `completed`. Always the last event for the task.
    Complete {
        result: String,
        attachments: Vec<String>,
    },

    /// Task reached `error`. Always the last event for the task.
    Error { kind: String, message: String },

    /// Context window telemetry.
    ContextUsage {
        used: u64,
        cache_read: u64,
        cache_write: u64,
        percent: f64,
    },

    /// The agent performed context compaction.
    Compact { reason: String },

    /// An intervention was handed to the engine.
    InterventionSent { user: String, text: String },

    /// Diagnostic.
    Debug {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

impl TaskEvent {
    /// The SSE `event:` field value for this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Session { .. } => "session",
            Self::Progress { .. } => "progress",
            Self::TextStart { .. } => "text_start",
            Self::TextDelta { .. } => "text_delta",
            Self::TextEnd { .. } => "text_end",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::Result { .. } => "result",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::ContextUsage { .. } => "context_usage",
            Self::Compact { .. } => "compact",
            Self::InterventionSent { .. } => "intervention_sent",
            Self::Debug { .. } => "debug",
        }
    }

    /// `complete` and `error` close the stream for a task.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stored record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One line in a task's JSONL log, and one entry in a listener queue.
///
/// `id` 0 is reserved for unlogged meta events (e.g. the reconnect
/// snapshot); the SSE writer omits the `id:` field for those so client
/// `Last-Event-ID` tracking is not disturbed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: u64,
    pub event: TaskEvent,
}

impl StoredEvent {
    pub fn new(id: u64, event: TaskEvent) -> Self {
        Self { id, event }
    }

    /// An unlogged meta event (no `id:` on the wire).
    pub fn meta(event: TaskEvent) -> Self {
        Self { id: 0, event }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
