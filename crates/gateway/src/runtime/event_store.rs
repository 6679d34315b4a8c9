//! Append-only event store — one JSONL file per task.
//!
//! Events get dense, monotonically increasing ids starting at 1. The id
//! counter is recovered by scanning the file once on first use, so ids
//! stay stable across restarts. A per-task async mutex serializes
//! appends and keeps readers from observing torn lines; corrupted or
//! partial lines (e.g. after a crash) are tolerated on read and skipped.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use tr_domain::{Error, Result, StoredEvent, TaskEvent, TaskKey};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path sanitization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Keep only `[A-Za-z0-9._-]` from a client-supplied path component.
/// An empty result is rejected — the component carried nothing usable.
pub fn sanitize_component(raw: &str) -> Result<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return Err(Error::BadRequest(format!(
            "identifier {raw:?} has no filesystem-safe characters"
        )));
    }
    Ok(cleaned)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FileState {
    path: PathBuf,
    /// Next id to assign; `None` until the file has been scanned.
    next_id: Option<u64>,
    /// The file ends in a torn line (crash mid-append). The next append
    /// starts a fresh line; the torn one is left in place and ignored.
    needs_newline: bool,
}

pub struct EventStore {
    base: PathBuf,
    fsync: bool,
    /// Per-task lock map, lazily created on first use and never
    /// garbage-collected; cost is bounded by the number of active keys.
    files: Mutex<HashMap<TaskKey, Arc<tokio::sync::Mutex<FileState>>>>,
}

impl EventStore {
    pub fn new(base: impl Into<PathBuf>, fsync: bool) -> Self {
        Self {
            base: base.into(),
            fsync,
            files: Mutex::new(HashMap::new()),
        }
    }

    fn file_path(&self, key: &TaskKey) -> Result<PathBuf> {
        let client = sanitize_component(&key.client_id)?;
        let request = sanitize_component(&key.request_id)?;
        Ok(self.base.join(client).join(format!("{request}.jsonl")))
    }

    fn file_state(&self, key: &TaskKey) -> Result<Arc<tokio::sync::Mutex<FileState>>> {
        let path = self.file_path(key)?;
        let mut files = self.files.lock();
        Ok(files
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(FileState {
                    path,
                    next_id: None,
                    needs_newline: false,
                }))
            })
            .clone())
    }

    /// Append one event; returns its assigned id.
    pub async fn append(&self, key: &TaskKey, event: TaskEvent) -> Result<u64> {
        let state = self.file_state(key)?;
        let mut state = state.lock().await;

        let id = match state.next_id {
            Some(id) => id,
            None => {
                state.needs_newline = Self::has_torn_tail(&state.path);
                Self::scan_next_id(&state.path)?
            }
        };

        if let Some(parent) = state.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let record = StoredEvent::new(id, event);
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        if state.needs_newline {
            line.insert(0, '\n');
            state.needs_newline = false;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&state.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        if self.fsync {
            file.sync_all()?;
        }

        state.next_id = Some(id + 1);
        Ok(id)
    }

    /// All events for a task, in id order. Missing file → empty.
    pub async fn read_all(&self, key: &TaskKey) -> Result<Vec<StoredEvent>> {
        self.read_since(key, 0).await
    }

    /// Events with `id > after_id`, in id order.
    pub async fn read_since(&self, key: &TaskKey, after_id: u64) -> Result<Vec<StoredEvent>> {
        let state = self.file_state(key)?;
        let state = state.lock().await;
        Ok(Self::read_file(&state.path, after_id))
    }

    /// Delete a task's log file.
    pub async fn delete_session(&self, key: &TaskKey) -> Result<()> {
        let state = self.file_state(key)?;
        {
            let mut state = state.lock().await;
            match std::fs::remove_file(&state.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            state.next_id = None;
        }
        self.files.lock().remove(key);
        Ok(())
    }

    /// Enumerate `(client_id, request_id)` pairs with a log on disk.
    /// Names are the sanitized path components.
    pub fn list_sessions(&self) -> Vec<TaskKey> {
        let mut keys = Vec::new();
        let Ok(clients) = std::fs::read_dir(&self.base) else {
            return keys;
        };
        for client in clients.flatten() {
            if !client.path().is_dir() {
                continue;
            }
            let client_id = client.file_name().to_string_lossy().to_string();
            let Ok(requests) = std::fs::read_dir(client.path()) else {
                continue;
            };
            for request in requests.flatten() {
                let name = request.file_name().to_string_lossy().to_string();
                if let Some(request_id) = name.strip_suffix(".jsonl") {
                    keys.push(TaskKey::new(client_id.clone(), request_id));
                }
            }
        }
        keys
    }

    // ── File helpers ──────────────────────────────────────────────────

    /// Scan an existing file for the max id; next id is max + 1 (or 1).
    fn scan_next_id(path: &PathBuf) -> Result<u64> {
        let max = Self::read_file(path, 0).last().map(|r| r.id).unwrap_or(0);
        Ok(max + 1)
    }

    /// A non-empty file without a trailing newline ends in a torn line.
    fn has_torn_tail(path: &PathBuf) -> bool {
        std::fs::read(path)
            .map(|bytes| !bytes.is_empty() && bytes.last() != Some(&b'\n'))
            .unwrap_or(false)
    }

    fn read_file(path: &PathBuf, after_id: u64) -> Vec<StoredEvent> {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        raw.lines()
            .filter_map(|line| {
                let line = line.trim();
                if line.is_empty() {
                    return None;
                }
                match serde_json::from_str::<StoredEvent>(line) {
                    Ok(record) => Some(record),
                    Err(_) => {
                        // Partial last line after a crash, or corruption.
                        tracing::debug!(path = %path.display(), "skipping corrupt event line");
                        None
                    }
                }
            })
            .filter(|record| record.id > after_id)
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
