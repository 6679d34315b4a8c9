//! Domain error → HTTP response mapping.
//!
//! Every domain error carries a stable kind; the response body is
//! `{"error": {"kind": ..., "message": ...}}` with the matching status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use tr_domain::Error;

pub struct ApiError(pub Error);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            "conflict" | "not-running" => StatusCode::CONFLICT,
            "not-found" => StatusCode::NOT_FOUND,
            "rate-limited" => StatusCode::TOO_MANY_REQUESTS,
            "bad-request" => StatusCode::BAD_REQUEST,
            "unauthenticated" => StatusCode::UNAUTHORIZED,
            "forbidden" => StatusCode::FORBIDDEN,
            "cancelled" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "error": { "kind": kind, "message": self.0.to_string() }
        }));
        (status, body).into_response()
    }
}
