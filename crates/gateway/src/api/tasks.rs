//! Task API endpoints — query, reconnect, ack, deliver, intervene.
//!
//! - `GET    /tasks?client_id=...`          — list a client's tasks
//! - `GET    /tasks/:client/:req`           — get one task
//! - `GET    /tasks/:client/:req/reconnect` — reattach SSE, honors `Last-Event-ID`
//! - `POST   /tasks/:client/:req/ack`       — acknowledge delivery + delete
//! - `POST   /tasks/:client/:req/delivered` — record delivery timestamp
//! - `POST   /tasks/:client/:req/intervene` — enqueue an intervention
//! - `POST   /sessions/:session/intervene`  — same, keyed by agent session

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use tr_domain::{InterventionMessage, Task, TaskKey};

use crate::api::error::ApiResult;
use crate::api::sse::{live_task_stream, replay_stream};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query / body shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub client_id: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct InterveneBody {
    pub text: String,
    pub user: String,
    #[serde(default)]
    pub attachment_paths: Vec<String>,
}

impl From<InterveneBody> for InterventionMessage {
    fn from(body: InterveneBody) -> Self {
        Self {
            text: body.text,
            user: body.user,
            attachment_paths: body.attachment_paths,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /tasks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(q): Query<ListTasksQuery>,
) -> impl IntoResponse {
    let all = state.manager.list_by_client(&q.client_id);
    let total = all.len();
    let limit = q.limit.min(200);
    let tasks: Vec<Task> = all.into_iter().skip(q.offset).take(limit).collect();

    Json(serde_json::json!({
        "tasks": tasks,
        "total": total,
        "limit": limit,
        "offset": q.offset,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /tasks/:client/:req
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_task(
    State(state): State<AppState>,
    Path((client, request)): Path<(String, String)>,
) -> ApiResult<Json<Task>> {
    let task = state.manager.get(&TaskKey::new(client, request))?;
    Ok(Json(task))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /tasks/:client/:req/reconnect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reattach an SSE stream. Replays events with `id > Last-Event-ID`
/// (header absent → full replay), preceded by a status snapshot; a
/// running task then streams live until terminal, a terminal task
/// closes after the stored tail.
pub async fn reconnect(
    State(state): State<AppState>,
    Path((client, request)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let key = TaskKey::new(client, request);
    let task = state.manager.get(&key)?;
    let after_id = last_event_id(&headers);
    let snapshot = state.manager.reconnect_status(&key);

    if task.status.is_terminal() {
        let events = state.manager.read_events_since(&key, after_id).await?;
        let stream = replay_stream(snapshot, events);
        return Ok(Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let stream = live_task_stream(state.clone(), key, after_id, snapshot);
    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn last_event_id(headers: &HeaderMap) -> u64 {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /tasks/:client/:req/ack
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn ack_task(
    State(state): State<AppState>,
    Path((client, request)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    state.manager.ack(&TaskKey::new(client, request)).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /tasks/:client/:req/delivered
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn mark_delivered(
    State(state): State<AppState>,
    Path((client, request)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let task = state.manager.mark_delivered(&TaskKey::new(client, request))?;
    Ok(Json(serde_json::json!({
        "delivered": true,
        "delivered_at": task.delivered_at,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interventions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn intervene(
    State(state): State<AppState>,
    Path((client, request)): Path<(String, String)>,
    Json(body): Json<InterveneBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .manager
        .add_intervention(&TaskKey::new(client, request), body.into())?;
    Ok(Json(serde_json::json!({ "queued": true })))
}

pub async fn intervene_by_session(
    State(state): State<AppState>,
    Path(session): Path<String>,
    Json(body): Json<InterveneBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .manager
        .add_intervention_by_session(&session, body.into())?;
    Ok(Json(serde_json::json!({ "queued": true })))
}
