//! Task executor — drives one task from admission to terminal state.
//!
//! Spawned by the manager on create; non-blocking for the caller. The
//! executor acquires an admission slot (failing `rate-limited` on
//! timeout), streams the engine adapter's events into the log and the
//! listener fan-out, applies their side effects, and finalizes the task
//! exactly once. The admission permit is RAII and cannot leak.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::Instrument;

use tr_domain::{CancelToken, Task, TaskEvent};
use tr_engine::adapter::{ExecuteRequest, InterventionHook};

use super::manager::TaskManager;

pub(crate) fn spawn(
    manager: Arc<TaskManager>,
    task: Task,
    cancel: CancelToken,
) -> JoinHandle<()> {
    let span = tracing::info_span!(
        "task_executor",
        client_id = %task.client_id,
        request_id = %task.request_id,
    );
    tokio::spawn(run(manager, task, cancel).instrument(span))
}

struct EngineOutcome {
    success: bool,
    output: Option<String>,
    error: Option<String>,
    attachments: Vec<String>,
}

async fn run(manager: Arc<TaskManager>, task: Task, cancel: CancelToken) {
    let key = task.key();

    // 1. Admission — bounded concurrency with a configured wait.
    let acquire_timeout = manager.config().admission.acquire_timeout();
    let permit = match manager.admission().acquire(acquire_timeout).await {
        Ok(permit) => permit,
        Err(e) => {
            tracing::warn!(task = %key, "admission timed out");
            manager.finalize_error(&key, "rate-limited", e.to_string()).await;
            return;
        }
    };

    // 2. Drive the engine adapter's event stream.
    let intervention_hook: InterventionHook = {
        let manager = Arc::clone(&manager);
        let key = key.clone();
        Arc::new(move || manager.get_intervention(&key))
    };
    let request = ExecuteRequest {
        prompt: task.prompt.clone(),
        resume_session_id: task.resume_session_id.clone(),
        allowed_tools: task.allowed_tools.clone(),
        disallowed_tools: task.disallowed_tools.clone(),
        use_mcp: task.use_mcp,
    };
    let mut events = tr_engine::execute(
        manager.pool(),
        request,
        intervention_hook,
        cancel.clone(),
    );

    let mut outcome: Option<EngineOutcome> = None;
    while let Some(event) = events.recv().await {
        match &event {
            TaskEvent::Session { session_id } => {
                manager.bind_session(&key, session_id);
            }
            TaskEvent::Result { success, output, error, attachments } => {
                outcome = Some(EngineOutcome {
                    success: *success,
                    output: output.clone(),
                    error: error.clone(),
                    attachments: attachments.clone(),
                });
            }
            _ => {}
        }
        if let Err(e) = manager.append_and_broadcast(&key, event).await {
            tracing::warn!(task = %key, error = %e, "recording event failed");
        }
    }

    // 3. Finalize exactly once; the permit releases on every path.
    if cancel.is_cancelled() {
        manager
            .finalize_error(&key, "cancelled", "task was cancelled".into())
            .await;
    } else {
        match outcome {
            Some(o) if o.success => {
                manager
                    .finalize_complete(&key, o.output.unwrap_or_default(), o.attachments)
                    .await;
            }
            Some(o) => {
                let message = o
                    .error
                    .unwrap_or_else(|| "agent reported failure".into());
                manager.finalize_error(&key, "agent-failed", message).await;
            }
            None => {
                manager
                    .finalize_error(&key, "internal", "engine produced no result".into())
                    .await;
            }
        }
    }
    drop(permit);
}
