//! `POST /execute` — create a task and immediately stream its events.
//!
//! Returns 202 with a `text/event-stream` body. Disconnecting the
//! stream does NOT cancel the task; the client reconnects via
//! `GET /tasks/:client/:req/reconnect` to catch up.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use tr_domain::task::TaskOptions;
use tr_domain::{Error, TaskKey};

use crate::api::error::ApiResult;
use crate::api::sse::live_task_stream;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    pub client_id: String,
    pub request_id: String,
    pub prompt: String,
    #[serde(default)]
    pub resume_session_id: Option<String>,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub disallowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub use_mcp: bool,
}

pub async fn execute_task(
    State(state): State<AppState>,
    Json(body): Json<ExecuteBody>,
) -> ApiResult<Response> {
    if state.manager.is_shutting_down() {
        return Err(Error::Cancelled("shutdown in progress".into()).into());
    }
    if body.client_id.trim().is_empty()
        || body.request_id.trim().is_empty()
        || body.prompt.trim().is_empty()
    {
        return Err(
            Error::BadRequest("client_id, request_id and prompt are required".into()).into(),
        );
    }

    let key = TaskKey::new(body.client_id, body.request_id);
    let opts = TaskOptions {
        resume_session_id: body.resume_session_id,
        allowed_tools: body.allowed_tools,
        disallowed_tools: body.disallowed_tools,
        use_mcp: body.use_mcp,
    };
    state.manager.create(key.clone(), body.prompt, opts).await?;

    // Replay-from-zero covers events the executor already appended
    // before this stream attached.
    let stream = live_task_stream(state.clone(), key, 0, None);
    Ok((
        StatusCode::ACCEPTED,
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response())
}
