use std::sync::Arc;

use tokio::sync::Notify;

use tr_domain::config::Config;

use crate::attachments::AttachmentStore;
use crate::runtime::TaskManager;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// The task lifecycle façade.
    pub manager: Arc<TaskManager>,
    /// Attachment byte sink.
    pub attachments: Arc<AttachmentStore>,
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
    /// Signalled to begin graceful shutdown.
    pub shutdown: Arc<Notify>,
}
