//! The task model — one client-visible unit of agent execution.
//!
//! A task is uniquely identified by `(client_id, request_id)`, both
//! opaque strings chosen by the client (typically bot name + thread id).
//! The agent's own conversation id (`claude_session_id`) is orthogonal
//! to the task key and indexed separately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task key
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The unique task key: `(client_id, request_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub client_id: String,
    pub request_id: String,
}

impl TaskKey {
    pub fn new(client_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            request_id: request_id.into(),
        }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.client_id, self.request_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub client_id: String,
    pub request_id: String,
    pub status: TaskStatus,
    pub prompt: String,
    /// Agent session handle to continue an earlier conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
    /// Final text when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Failure message when errored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Agent session id learned during execution; alternate index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_session_id: Option<String>,
    /// Opaque paths produced by execution.
    #[serde(default)]
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set exactly once, after the terminal result was handed to the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disallowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub use_mcp: bool,
}

/// Optional knobs accepted at task creation.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub resume_session_id: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub disallowed_tools: Option<Vec<String>>,
    pub use_mcp: bool,
}

impl Task {
    pub fn new(key: TaskKey, prompt: impl Into<String>, opts: TaskOptions) -> Self {
        Self {
            client_id: key.client_id,
            request_id: key.request_id,
            status: TaskStatus::Running,
            prompt: prompt.into(),
            resume_session_id: opts.resume_session_id,
            result: None,
            error: None,
            claude_session_id: None,
            attachments: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
            delivered_at: None,
            allowed_tools: opts.allowed_tools,
            disallowed_tools: opts.disallowed_tools,
            use_mcp: opts.use_mcp,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.client_id.clone(), self.request_id.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Intervention message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A user-supplied message injected into a running task mid-execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionMessage {
    pub text: String,
    pub user: String,
    #[serde(default)]
    pub attachment_paths: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_is_terminal() {
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
    }

    #[test]
    fn task_status_snake_case_serialization() {
        assert_eq!(serde_json::to_string(&TaskStatus::Running).unwrap(), "\"running\"");
        assert_eq!(serde_json::to_string(&TaskStatus::Completed).unwrap(), "\"completed\"");
        assert_eq!(serde_json::to_string(&TaskStatus::Error).unwrap(), "\"error\"");
    }

    #[test]
    fn task_new_defaults() {
        let task = Task::new(TaskKey::new("bot", "t1"), "hi", TaskOptions::default());
        assert_eq!(task.client_id, "bot");
        assert_eq!(task.request_id, "t1");
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.result.is_none());
        assert!(task.error.is_none());
        assert!(task.claude_session_id.is_none());
        assert!(task.attachments.is_empty());
        assert!(task.completed_at.is_none());
        assert!(task.delivered_at.is_none());
        assert!(!task.use_mcp);
    }

    #[test]
    fn task_key_display() {
        let key = TaskKey::new("bot", "thread-42");
        assert_eq!(key.to_string(), "bot/thread-42");
    }

    #[test]
    fn task_key_roundtrips_through_task() {
        let key = TaskKey::new("bot", "t1");
        let task = Task::new(key.clone(), "hi", TaskOptions::default());
        assert_eq!(task.key(), key);
    }

    #[test]
    fn task_serde_skips_absent_optionals() {
        let task = Task::new(TaskKey::new("bot", "t1"), "hi", TaskOptions::default());
        let json = serde_json::to_string(&task).unwrap();
        assert!(!json.contains("resume_session_id"));
        assert!(!json.contains("delivered_at"));
        assert!(json.contains("\"status\":\"running\""));
    }

    #[test]
    fn task_deserialize_missing_optionals() {
        let json = r#"{
            "client_id": "bot",
            "request_id": "t1",
            "status": "completed",
            "prompt": "hi",
            "created_at": "2026-01-01T00:00:00Z"
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.attachments.is_empty());
        assert!(!task.use_mcp);
    }

    #[test]
    fn intervention_deserialize_defaults_paths() {
        let msg: InterventionMessage =
            serde_json::from_str(r#"{"text":"also check X","user":"U1"}"#).unwrap();
        assert_eq!(msg.text, "also check X");
        assert!(msg.attachment_paths.is_empty());
    }
}
