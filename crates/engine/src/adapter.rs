//! Engine adapter — wraps one agent execution as an async event stream.
//!
//! [`execute`] acquires a runner from the pool, feeds the prompt, and
//! forwards the runner's events as [`TaskEvent`]s, minting an 8-char
//! card id per text block and attributing tool results to their cards.
//! Between events it polls the intervention hook: a queued intervention
//! interrupts a mid-flight generation and is fed as a follow-up prompt.
//! On every exit path the runner goes back to the pool keyed by the
//! session id learned from the stream (or is discarded if unhealthy).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use tr_domain::{CancelToken, InterventionMessage, TaskEvent};

use crate::pool::RunnerPool;
use crate::runner::{AgentRunner, PromptRequest, RunnerEvent};

/// Non-blocking source of queued interventions for one task.
pub type InterventionHook = Arc<dyn Fn() -> Option<InterventionMessage> + Send + Sync>;

const EVENT_CHANNEL_DEPTH: usize = 64;

/// How often the loop wakes to check cancellation and interventions
/// while the runner is quiet.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execute request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct ExecuteRequest {
    pub prompt: String,
    pub resume_session_id: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub disallowed_tools: Option<Vec<String>>,
    pub use_mcp: bool,
}

impl ExecuteRequest {
    fn prompt_request(&self, prompt: String, resume: Option<String>) -> PromptRequest {
        PromptRequest {
            prompt,
            resume_session_id: resume,
            allowed_tools: self.allowed_tools.clone(),
            disallowed_tools: self.disallowed_tools.clone(),
            use_mcp: self.use_mcp,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Card tracking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mints card ids and remembers `tool_use_id → card_id` so tool results
/// attribute correctly even after later cards start.
#[derive(Default)]
struct CardTracker {
    current: Option<String>,
    tools: HashMap<String, String>,
}

impl CardTracker {
    fn mint() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }

    fn begin(&mut self) -> String {
        let id = Self::mint();
        self.current = Some(id.clone());
        id
    }

    fn current(&mut self) -> String {
        if let Some(id) = self.current.clone() {
            id
        } else {
            self.begin()
        }
    }

    fn end(&mut self) -> String {
        self.current.take().unwrap_or_else(Self::mint)
    }

    fn for_tool(&mut self, tool_use_id: &str) -> String {
        let id = Self::mint();
        self.tools.insert(tool_use_id.to_owned(), id.clone());
        id
    }

    fn tool_card(&self, tool_use_id: &str) -> String {
        self.tools
            .get(tool_use_id)
            .cloned()
            .unwrap_or_else(Self::mint)
    }

    fn reset(&mut self) {
        self.current = None;
        self.tools.clear();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// execute
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Start one agent execution. Returns a cold receiver of task events;
/// the drive loop runs as a background tokio task.
pub fn execute(
    pool: Arc<RunnerPool>,
    req: ExecuteRequest,
    get_intervention: InterventionHook,
    cancel: CancelToken,
) -> mpsc::Receiver<TaskEvent> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
    tokio::spawn(async move {
        drive(pool, req, get_intervention, cancel, tx).await;
    });
    rx
}

async fn drive(
    pool: Arc<RunnerPool>,
    req: ExecuteRequest,
    get_intervention: InterventionHook,
    cancel: CancelToken,
    tx: mpsc::Sender<TaskEvent>,
) {
    let mut runner = match pool.acquire(req.resume_session_id.as_deref()).await {
        Ok(runner) => runner,
        Err(e) => {
            let _ = tx
                .send(TaskEvent::Result {
                    success: false,
                    output: None,
                    error: Some(format!("acquiring runner: {e}")),
                    attachments: vec![],
                })
                .await;
            return;
        }
    };

    let (session_id, healthy) =
        run_stream(&pool, &mut runner, &req, &get_intervention, &cancel, &tx).await;

    if healthy {
        pool.release(runner, session_id).await;
    } else {
        runner.disconnect().await;
    }
}

/// The inner event loop. Returns the learned session id and whether the
/// runner is still fit for pooling.
async fn run_stream(
    pool: &RunnerPool,
    runner: &mut Box<dyn AgentRunner>,
    req: &ExecuteRequest,
    get_intervention: &InterventionHook,
    cancel: &CancelToken,
    tx: &mpsc::Sender<TaskEvent>,
) -> (Option<String>, bool) {
    let mut session_id: Option<String> = None;
    let mut cards = CardTracker::default();
    let mut generating = true;
    let mut retried = false;

    let first = req.prompt_request(req.prompt.clone(), req.resume_session_id.clone());
    if let Err(e) = runner.send_prompt(first).await {
        emit_failure(tx, format!("sending prompt: {e}")).await;
        return (session_id, false);
    }

    loop {
        if cancel.is_cancelled() {
            // Interrupt leaves the runner reusable; a failed interrupt
            // means the subprocess is gone.
            let ok = runner.interrupt().await.is_ok();
            return (session_id, ok);
        }

        if let Some(msg) = get_intervention() {
            if generating {
                if let Err(e) = runner.interrupt().await {
                    emit_failure(tx, format!("interrupting for intervention: {e}")).await;
                    return (session_id, false);
                }
            }
            if !send_follow_up(runner, req, &msg, &session_id, tx).await {
                return (session_id, false);
            }
            generating = true;
            continue;
        }

        let event = match tokio::time::timeout(POLL_INTERVAL, runner.next_event()).await {
            // Quiet runner: loop back to check cancellation/interventions.
            Err(_) => continue,
            Ok(Ok(Some(event))) => event,
            Ok(Ok(None)) => {
                emit_failure(tx, "engine stream ended unexpectedly".into()).await;
                return (session_id, false);
            }
            Ok(Err(e)) => {
                emit_failure(tx, format!("reading engine stream: {e}")).await;
                return (session_id, false);
            }
        };

        match event {
            RunnerEvent::SessionStarted { session_id: sid } => {
                session_id = Some(sid.clone());
                send(tx, TaskEvent::Session { session_id: sid }).await;
            }
            RunnerEvent::TextStart => {
                let card_id = cards.begin();
                send(tx, TaskEvent::TextStart { card_id }).await;
            }
            RunnerEvent::TextDelta { text } => {
                let card_id = cards.current();
                send(tx, TaskEvent::TextDelta { card_id, text }).await;
            }
            RunnerEvent::TextEnd => {
                let card_id = cards.end();
                send(tx, TaskEvent::TextEnd { card_id }).await;
            }
            // Thinking output surfaces as progress hints; the canonical
            // SSE set has no thinking_* types.
            RunnerEvent::ThinkingStart | RunnerEvent::ThinkingEnd => {}
            RunnerEvent::ThinkingDelta { text } => {
                send(tx, TaskEvent::Progress { text }).await;
            }
            RunnerEvent::ToolStart { tool_use_id, tool_name, input } => {
                let card_id = cards.for_tool(&tool_use_id);
                send(tx, TaskEvent::ToolStart { card_id, tool_use_id, tool_name, input }).await;
            }
            RunnerEvent::ToolResult { tool_use_id, tool_name, result, is_error } => {
                let card_id = cards.tool_card(&tool_use_id);
                send(
                    tx,
                    TaskEvent::ToolResult { card_id, tool_use_id, tool_name, result, is_error },
                )
                .await;
            }
            RunnerEvent::RateLimit { message } => {
                send(tx, TaskEvent::Progress { text: message }).await;
            }
            RunnerEvent::Compact { reason } => {
                send(tx, TaskEvent::Compact { reason }).await;
            }
            RunnerEvent::ContextUsage { used, cache_read, cache_write, percent } => {
                send(tx, TaskEvent::ContextUsage { used, cache_read, cache_write, percent }).await;
            }
            RunnerEvent::Result { success, output, error, attachments } => {
                generating = false;

                // A stale resume handle is recoverable exactly once:
                // restart against a fresh session.
                if !success
                    && !retried
                    && req.resume_session_id.is_some()
                    && is_stale_session(error.as_deref())
                {
                    retried = true;
                    tracing::info!("stale resume session; retrying with a fresh session");
                    runner.disconnect().await;
                    match pool.acquire(None).await {
                        Ok(fresh) => *runner = fresh,
                        Err(e) => {
                            emit_failure(tx, format!("acquiring retry runner: {e}")).await;
                            return (None, false);
                        }
                    }
                    session_id = None;
                    cards.reset();
                    let fresh_prompt = req.prompt_request(req.prompt.clone(), None);
                    if let Err(e) = runner.send_prompt(fresh_prompt).await {
                        emit_failure(tx, format!("retry prompt: {e}")).await;
                        return (session_id, false);
                    }
                    generating = true;
                    continue;
                }

                send(tx, TaskEvent::Result { success, output, error, attachments }).await;

                if !success {
                    return (session_id, true);
                }
                // Between turns: a queued intervention keeps the
                // conversation going; otherwise we are done.
                match get_intervention() {
                    Some(msg) => {
                        if !send_follow_up(runner, req, &msg, &session_id, tx).await {
                            return (session_id, false);
                        }
                        generating = true;
                    }
                    None => return (session_id, true),
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn send(tx: &mpsc::Sender<TaskEvent>, event: TaskEvent) {
    // The executor owns the receiving side; if it hung up the events
    // have nowhere to go and dropping them is correct.
    let _ = tx.send(event).await;
}

async fn emit_failure(tx: &mpsc::Sender<TaskEvent>, message: String) {
    send(
        tx,
        TaskEvent::Result {
            success: false,
            output: None,
            error: Some(message),
            attachments: vec![],
        },
    )
    .await;
}

/// Feed an intervention as a follow-up prompt and surface the handoff.
async fn send_follow_up(
    runner: &mut Box<dyn AgentRunner>,
    req: &ExecuteRequest,
    msg: &InterventionMessage,
    session_id: &Option<String>,
    tx: &mpsc::Sender<TaskEvent>,
) -> bool {
    let follow = req.prompt_request(format_intervention(msg), session_id.clone());
    match runner.send_prompt(follow).await {
        Ok(()) => {
            send(
                tx,
                TaskEvent::InterventionSent { user: msg.user.clone(), text: msg.text.clone() },
            )
            .await;
            true
        }
        Err(e) => {
            emit_failure(tx, format!("sending intervention: {e}")).await;
            false
        }
    }
}

fn format_intervention(msg: &InterventionMessage) -> String {
    let mut text = format!("[{}] {}", msg.user, msg.text);
    if !msg.attachment_paths.is_empty() {
        text.push_str("\nAttachments:");
        for path in &msg.attachment_paths {
            text.push('\n');
            text.push_str(path);
        }
    }
    text
}

fn is_stale_session(error: Option<&str>) -> bool {
    error.is_some_and(|e| e.to_ascii_lowercase().contains("session not found"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
