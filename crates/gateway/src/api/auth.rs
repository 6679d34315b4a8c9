//! Bearer-token gate for the protected route group.
//!
//! The token value itself never appears in the config file — the file
//! only names an env var, and the composition root resolves it once at
//! boot, storing a SHA-256 digest on `AppState`. Requests are checked
//! against that digest here. When no digest was configured the gate is
//! open (dev mode); the boot log carries a single warning for that.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use tr_domain::Error;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Middleware for the protected routes; wired in [`crate::api::router`]
/// through `from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match check_bearer(&state, &req) {
        Ok(()) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

/// Verify the presented token against the stored digest.
///
/// The presented value is hashed before comparing, so both sides are
/// fixed-length and the `ct_eq` comparison leaks neither content nor
/// token length. Failures surface as the same `unauthenticated` JSON
/// body every other endpoint error uses.
fn check_bearer(state: &AppState, req: &Request<Body>) -> Result<(), ApiError> {
    let Some(expected) = state.api_token_hash.as_deref() else {
        // Dev mode: no token configured, gate open.
        return Ok(());
    };

    let presented = bearer_token(req).unwrap_or("");
    let digest = Sha256::digest(presented.as_bytes());
    if bool::from(digest.ct_eq(expected)) {
        Ok(())
    } else {
        Err(Error::Unauthenticated("invalid or missing API token".into()).into())
    }
}

/// The token from an `Authorization: Bearer <token>` header, if any.
fn bearer_token<'a>(req: &'a Request<Body>) -> Option<&'a str> {
    req.headers()
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/tasks");
        if let Some(value) = auth {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn bearer_token_requires_the_scheme_prefix() {
        assert_eq!(bearer_token(&request_with(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&request_with(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&request_with(Some("bearer abc"))), None);
        assert_eq!(bearer_token(&request_with(None)), None);
    }

    #[test]
    fn bearer_token_keeps_the_raw_value() {
        assert_eq!(
            bearer_token(&request_with(Some("Bearer  padded "))),
            Some(" padded ")
        );
    }
}
