//! The agent runner contract.
//!
//! A runner is a warm, reusable handle to one agent subprocess. The
//! production implementation lives in [`crate::process`]; tests inject
//! scripted fakes through [`RunnerFactory`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tr_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One prompt (initial or follow-up) handed to a runner.
#[derive(Debug, Clone, Serialize, Default)]
pub struct PromptRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disallowed_tools: Option<Vec<String>>,
    pub use_mcp: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events observed on a runner's stdout stream.
///
/// These are the engine's wire shapes; the adapter maps them 1:1 onto
/// the SSE event taxonomy (minting card ids along the way).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerEvent {
    SessionStarted { session_id: String },
    TextStart,
    TextDelta { text: String },
    TextEnd,
    ThinkingStart,
    ThinkingDelta { text: String },
    ThinkingEnd,
    ToolStart {
        tool_use_id: String,
        tool_name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        tool_name: String,
        result: Value,
        #[serde(default)]
        is_error: bool,
    },
    /// Terminal summary for one turn of the conversation.
    Result {
        success: bool,
        #[serde(default)]
        output: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        attachments: Vec<String>,
    },
    RateLimit { message: String },
    Compact { reason: String },
    ContextUsage {
        used: u64,
        cache_read: u64,
        cache_write: u64,
        percent: f64,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A warm handle to one agent subprocess.
#[async_trait]
pub trait AgentRunner: Send {
    /// Hand a prompt (or intervention follow-up) to the agent.
    async fn send_prompt(&mut self, req: PromptRequest) -> Result<()>;

    /// Next event from the agent stream. `None` means the stream closed.
    async fn next_event(&mut self) -> Result<Option<RunnerEvent>>;

    /// Interrupt a mid-flight generation. The runner stays usable and
    /// accepts a new prompt afterwards.
    async fn interrupt(&mut self) -> Result<()>;

    /// Tear the subprocess down. Infallible: a runner being discarded
    /// has nothing useful to report.
    async fn disconnect(&mut self);
}

impl std::fmt::Debug for dyn AgentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn AgentRunner")
    }
}

/// Creates fresh runners; the pool's only way to mint capacity.
#[async_trait]
pub trait RunnerFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn AgentRunner>>;
}
