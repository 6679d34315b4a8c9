/// Shared error type used across all TaskRelay crates.
///
/// Every variant maps to a stable, transport-independent kind identifier
/// (see [`Error::kind`]); the HTTP layer translates kinds into status
/// codes and JSON bodies.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not running: {0}")]
    NotRunning(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("agent failed: {0}")]
    AgentFailed(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Stable kind identifier for this error, used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not-found",
            Self::NotRunning(_) => "not-running",
            Self::RateLimited(_) => "rate-limited",
            Self::BadRequest(_) => "bad-request",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::AgentFailed(_) => "agent-failed",
            Self::Cancelled(_) => "cancelled",
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_identifiers_are_stable() {
        assert_eq!(Error::Conflict("x".into()).kind(), "conflict");
        assert_eq!(Error::NotFound("x".into()).kind(), "not-found");
        assert_eq!(Error::NotRunning("x".into()).kind(), "not-running");
        assert_eq!(Error::RateLimited("x".into()).kind(), "rate-limited");
        assert_eq!(Error::AgentFailed("x".into()).kind(), "agent-failed");
        assert_eq!(Error::Cancelled("x".into()).kind(), "cancelled");
        assert_eq!(Error::Internal("x".into()).kind(), "internal");
    }

    #[test]
    fn io_and_json_map_to_internal() {
        let io = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(io.kind(), "internal");

        let json = Error::from(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
        assert_eq!(json.kind(), "internal");
    }

    #[test]
    fn display_includes_message() {
        let e = Error::Conflict("task already running".into());
        assert_eq!(e.to_string(), "conflict: task already running");
    }
}
