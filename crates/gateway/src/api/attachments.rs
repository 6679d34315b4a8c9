//! Attachment endpoints — multipart upload and per-thread cleanup.
//!
//! - `POST   /attachments`            — upload a file; returns its path
//! - `DELETE /attachments/:thread_id` — remove a thread's attachments

use axum::extract::{Multipart, Path, State};
use axum::response::Json;

use tr_domain::Error;

use crate::api::error::ApiResult;
use crate::state::AppState;

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<serde_json::Value>> {
    let mut thread_id: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadRequest(format!("reading multipart body: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("thread_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| Error::BadRequest(format!("reading thread_id: {e}")))?;
                thread_id = Some(text);
            }
            Some("file") => {
                let filename = field
                    .file_name()
                    .unwrap_or("attachment")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::BadRequest(format!("reading file: {e}")))?;
                file = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let thread_id =
        thread_id.ok_or_else(|| Error::BadRequest("thread_id field is required".into()))?;
    let (filename, bytes) =
        file.ok_or_else(|| Error::BadRequest("file field is required".into()))?;

    let saved = state.attachments.save(&thread_id, &filename, &bytes)?;
    tracing::debug!(thread_id, path = %saved.path, size = saved.size, "attachment stored");

    Ok(Json(serde_json::json!({
        "path": saved.path,
        "size": saved.size,
    })))
}

pub async fn delete_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = state.attachments.delete_thread(&thread_id)?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}
