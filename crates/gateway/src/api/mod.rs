pub mod admin;
pub mod attachments;
pub mod auth;
pub mod error;
pub mod execute;
pub mod sse;
pub mod tasks;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// `/health` is public; everything else sits behind the bearer-token
/// middleware. `state` is needed to wire the auth middleware at build
/// time.
pub fn router(state: AppState) -> Router<AppState> {
    // Multipart bodies carry the attachment plus field overhead.
    let body_limit = state.config.attachments.max_size_bytes as usize + 64 * 1024;

    let public = Router::new().route("/health", get(admin::health));

    let protected = Router::new()
        // Task lifecycle
        .route("/execute", post(execute::execute_task))
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/:client/:req", get(tasks::get_task))
        .route("/tasks/:client/:req/reconnect", get(tasks::reconnect))
        .route("/tasks/:client/:req/ack", post(tasks::ack_task))
        .route("/tasks/:client/:req/delivered", post(tasks::mark_delivered))
        // Interventions
        .route("/tasks/:client/:req/intervene", post(tasks::intervene))
        .route("/sessions/:session/intervene", post(tasks::intervene_by_session))
        // Attachments
        .route("/attachments", post(attachments::upload))
        .route("/attachments/:thread_id", delete(attachments::delete_thread))
        // Operator
        .route("/shutdown", post(admin::shutdown))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
