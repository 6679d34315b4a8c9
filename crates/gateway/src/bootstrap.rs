//! Composition root — wires explicit dependencies into an [`AppState`]
//! and spawns the background loops.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

use tr_domain::config::Config;
use tr_engine::{ProcessRunnerFactory, RunnerPool};

use crate::attachments::AttachmentStore;
use crate::runtime::cleanup::spawn_cleanup_loop;
use crate::runtime::TaskManager;
use crate::state::AppState;

/// A fully wired runtime: the shared state plus handles to the
/// background loops so the server can wind them down.
pub struct Runtime {
    pub state: AppState,
    pub pool: Arc<RunnerPool>,
    pub maintenance: JoinHandle<()>,
    pub cleanup: JoinHandle<()>,
}

/// Initialize every subsystem and return the wired runtime.
pub fn build(config: Arc<Config>) -> anyhow::Result<Runtime> {
    // ── API token (read once; hashed) ────────────────────────────────
    let api_token_hash = read_token_hash(&config.server.api_token_env);

    // ── Engine: runner factory + warm pool ───────────────────────────
    let factory = Arc::new(ProcessRunnerFactory::from_config(&config.engine));
    let pool = Arc::new(RunnerPool::new(factory, config.pool.clone()));
    let maintenance = pool.spawn_maintenance();
    tracing::info!(
        max_size = config.pool.max_size,
        min_generic = config.pool.min_generic,
        "runner pool ready"
    );

    // ── Task manager (stores + registry + admission + executor) ──────
    let manager = Arc::new(
        TaskManager::new(config.clone(), pool.clone())
            .context("initializing task manager")?,
    );
    tracing::info!(
        capacity = config.admission.max_concurrent,
        "task manager ready"
    );

    // ── Periodic cleanup of old terminal tasks ───────────────────────
    let cleanup = spawn_cleanup_loop(manager.clone());

    // ── Attachments ──────────────────────────────────────────────────
    let attachments = Arc::new(AttachmentStore::new(&config.attachments));
    tracing::info!(dir = %config.attachments.dir.display(), "attachment store ready");

    let state = AppState {
        config,
        manager,
        attachments,
        api_token_hash,
        shutdown: Arc::new(tokio::sync::Notify::new()),
    };

    Ok(Runtime { state, pool, maintenance, cleanup })
}

fn read_token_hash(env_name: &str) -> Option<Vec<u8>> {
    match std::env::var(env_name) {
        Ok(token) if !token.is_empty() => {
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env = env_name,
                "no API token configured — running unauthenticated (dev mode)"
            );
            None
        }
    }
}
