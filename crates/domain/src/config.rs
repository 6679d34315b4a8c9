//! TaskRelay configuration.
//!
//! Loaded from a TOML file (default `taskrelay.toml`); every knob has a
//! serde default so an empty file (or no file) yields a runnable dev
//! configuration. The bearer token itself is never stored in the file —
//! only the name of the environment variable that carries it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub listeners: ListenerConfig,
    #[serde(default)]
    pub attachments: AttachmentsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    /// Load from a TOML file. A missing file yields the default config.
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| crate::Error::BadRequest(format!("config parse: {e}")))
    }

    /// Validate the configuration, returning human-readable issues.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.admission.max_concurrent == 0 {
            issues.push(ConfigIssue::error("admission.max_concurrent must be >= 1"));
        }
        if self.pool.max_size == 0 {
            issues.push(ConfigIssue::error("pool.max_size must be >= 1"));
        }
        if self.pool.min_generic > self.pool.max_size {
            issues.push(ConfigIssue::error(
                "pool.min_generic must not exceed pool.max_size",
            ));
        }
        if self.listeners.queue_capacity == 0 {
            issues.push(ConfigIssue::error("listeners.queue_capacity must be >= 1"));
        }
        if self.engine.command.is_empty() {
            issues.push(ConfigIssue::warning(
                "engine.command is empty — task execution will fail until configured",
            ));
        }
        if self.storage.save_debounce_ms == 0 {
            issues.push(ConfigIssue::warning(
                "storage.save_debounce_ms is 0 — every mutation writes the snapshot",
            ));
        }
        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn error(message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Error, message: message.into() }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Warning, message: message.into() }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Name of the env var that carries the bearer token. Unset or empty
    /// env var means dev mode: no auth enforced.
    #[serde(default = "d_token_env")]
    pub api_token_env: String,
    /// Allowed CORS origin; `*` in dev.
    #[serde(default = "d_origin")]
    pub cors_origin: String,
    /// Grace period for winding down running tasks on shutdown.
    #[serde(default = "d_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            api_token_env: d_token_env(),
            cors_origin: d_origin(),
            shutdown_grace_secs: d_shutdown_grace(),
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Per-task JSONL event logs live under this directory.
    #[serde(default = "d_events_dir")]
    pub events_dir: PathBuf,
    /// Debounced snapshot of all task metadata.
    #[serde(default = "d_tasks_file")]
    pub tasks_file: PathBuf,
    #[serde(default = "d_debounce")]
    pub save_debounce_ms: u64,
    /// fsync each appended event line (off by default; the per-file lock
    /// already prevents torn reads).
    #[serde(default)]
    pub fsync_events: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            events_dir: d_events_dir(),
            tasks_file: d_tasks_file(),
            save_debounce_ms: d_debounce(),
            fsync_events: false,
        }
    }
}

impl StorageConfig {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admission
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Maximum concurrently executing tasks.
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent: usize,
    /// How long a new task may wait for admission before failing
    /// rate-limited.
    #[serde(default = "d_acquire_timeout")]
    pub acquire_timeout_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: d_max_concurrent(),
            acquire_timeout_ms: d_acquire_timeout(),
        }
    }
}

impl AdmissionConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Shared bound across the session and generic sub-pools.
    #[serde(default = "d_pool_max")]
    pub max_size: usize,
    /// Generic pool is topped back up to this many warm runners.
    #[serde(default = "d_min_generic")]
    pub min_generic: usize,
    #[serde(default = "d_idle_ttl")]
    pub idle_ttl_secs: u64,
    #[serde(default = "d_maintenance")]
    pub maintenance_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: d_pool_max(),
            min_generic: d_min_generic(),
            idle_ttl_secs: d_idle_ttl(),
            maintenance_interval_secs: d_maintenance(),
        }
    }
}

impl PoolConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cleanup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Terminal tasks older than this are deleted by the periodic cleaner.
    #[serde(default = "d_max_age_hours")]
    pub max_age_hours: u64,
    #[serde(default = "d_cleanup_interval")]
    pub interval_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_age_hours: d_max_age_hours(),
            interval_secs: d_cleanup_interval(),
        }
    }
}

impl CleanupConfig {
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_age_hours as i64)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Listeners
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bounded queue depth per SSE listener; overflow drops the listener.
    #[serde(default = "d_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self { queue_capacity: d_queue_capacity() }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Attachments
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentsConfig {
    #[serde(default = "d_attachments_dir")]
    pub dir: PathBuf,
    #[serde(default = "d_attachment_max")]
    pub max_size_bytes: u64,
    /// Lowercase extensions accepted for upload.
    #[serde(default = "d_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            dir: d_attachments_dir(),
            max_size_bytes: d_attachment_max(),
            allowed_extensions: d_extensions(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine subprocess
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Agent subprocess command (speaks JSON lines on stdio).
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    3710
}
fn d_token_env() -> String {
    "TASKRELAY_API_TOKEN".into()
}
fn d_origin() -> String {
    "*".into()
}
fn d_shutdown_grace() -> u64 {
    10
}
fn d_events_dir() -> PathBuf {
    PathBuf::from("./data/events")
}
fn d_tasks_file() -> PathBuf {
    PathBuf::from("./data/tasks.json")
}
fn d_debounce() -> u64 {
    500
}
fn d_max_concurrent() -> usize {
    5
}
fn d_acquire_timeout() -> u64 {
    30_000
}
fn d_pool_max() -> usize {
    5
}
fn d_min_generic() -> usize {
    1
}
fn d_idle_ttl() -> u64 {
    300
}
fn d_maintenance() -> u64 {
    30
}
fn d_max_age_hours() -> u64 {
    24
}
fn d_cleanup_interval() -> u64 {
    3600
}
fn d_queue_capacity() -> usize {
    256
}
fn d_attachments_dir() -> PathBuf {
    PathBuf::from("./data/attachments")
}
fn d_attachment_max() -> u64 {
    10 * 1024 * 1024
}
fn d_extensions() -> Vec<String> {
    ["txt", "md", "json", "csv", "log", "png", "jpg", "jpeg", "gif", "pdf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
