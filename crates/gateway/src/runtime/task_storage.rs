//! Debounced, atomic JSON snapshot of all task metadata.
//!
//! Many mutations coalesce into one deferred save: the first
//! `schedule_save` arms a timer, further schedules within the window are
//! absorbed. The write is atomic — serialize to a temp file in the same
//! directory, fsync, rename over the target — so a crash mid-save leaves
//! the previous snapshot intact.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tr_domain::{Error, Result, Task};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u32,
    tasks: Vec<Task>,
}

pub struct TaskStorage {
    path: PathBuf,
    debounce: Duration,
    /// A deferred save is already armed.
    armed: AtomicBool,
}

impl TaskStorage {
    pub fn new(path: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            path: path.into(),
            debounce,
            armed: AtomicBool::new(false),
        }
    }

    /// Load the snapshot. Absent or unparsable files yield the empty
    /// list (logged); an unknown future version is refused.
    pub fn load(&self) -> Result<Vec<Task>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "snapshot unparsable; starting empty");
                return Ok(Vec::new());
            }
        };

        let Some(version) = value.get("version").and_then(|v| v.as_u64()) else {
            tracing::warn!(path = %self.path.display(), "snapshot missing version; starting empty");
            return Ok(Vec::new());
        };
        if version != u64::from(SNAPSHOT_VERSION) {
            return Err(Error::Internal(format!(
                "unsupported snapshot version {version} (expected {SNAPSHOT_VERSION})"
            )));
        }

        match serde_json::from_value::<SnapshotEnvelope>(value) {
            Ok(envelope) => Ok(envelope.tasks),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "snapshot tasks unparsable; starting empty");
                Ok(Vec::new())
            }
        }
    }

    /// Write the snapshot now, atomically.
    pub fn save(&self, tasks: &[Task]) -> Result<()> {
        let envelope = SnapshotEnvelope { version: SNAPSHOT_VERSION, tasks: tasks.to_vec() };
        let json = serde_json::to_vec_pretty(&envelope)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            use std::io::Write;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Arm a deferred save. The snapshot closure runs at fire time so it
    /// captures the state current then, not now. Schedules landing while
    /// a save is armed are absorbed.
    pub fn schedule_save<F>(self: &Arc<Self>, snapshot: F)
    where
        F: FnOnce() -> Vec<Task> + Send + 'static,
    {
        if self.armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let storage = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(storage.debounce).await;
            storage.armed.store(false, Ordering::SeqCst);
            let tasks = snapshot();
            if let Err(e) = storage.save(&tasks) {
                tracing::warn!(error = %e, "deferred task snapshot failed");
            }
        });
    }

    /// Force an immediate save (shutdown path).
    pub fn flush(&self, tasks: &[Task]) -> Result<()> {
        self.save(tasks)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tr_domain::task::TaskOptions;
    use tr_domain::TaskKey;

    use super::*;

    fn task(request_id: &str) -> Task {
        Task::new(TaskKey::new("bot", request_id), "hi", TaskOptions::default())
    }

    fn storage_in(dir: &tempfile::TempDir) -> TaskStorage {
        TaskStorage::new(dir.path().join("tasks.json"), Duration::from_millis(10))
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);

        storage.save(&[task("t1"), task("t2")]).unwrap();
        let loaded = storage.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].request_id, "t1");
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        assert!(storage.load().unwrap().is_empty());
    }

    #[test]
    fn garbage_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        std::fs::write(dir.path().join("tasks.json"), "not json {{{").unwrap();
        assert!(storage.load().unwrap().is_empty());
    }

    #[test]
    fn missing_version_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        std::fs::write(dir.path().join("tasks.json"), r#"{"tasks":[]}"#).unwrap();
        assert!(storage.load().unwrap().is_empty());
    }

    #[test]
    fn future_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        std::fs::write(
            dir.path().join("tasks.json"),
            r#"{"version": 99, "tasks": []}"#,
        )
        .unwrap();
        let err = storage.load().unwrap_err();
        assert_eq!(err.kind(), "internal");
        assert!(err.to_string().contains("version 99"));
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        storage.save(&[task("t1")]).unwrap();
        assert!(!dir.path().join("tasks.json.tmp").exists());
        assert!(dir.path().join("tasks.json").exists());
    }

    #[test]
    fn overwrite_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(&dir);
        storage.save(&[task("t1"), task("t2")]).unwrap();
        storage.save(&[task("t3")]).unwrap();

        let loaded = storage.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].request_id, "t3");
    }

    #[tokio::test]
    async fn schedule_save_coalesces() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(storage_in(&dir));
        let fired = Arc::new(AtomicUsize::new(0));

        let f1 = fired.clone();
        storage.schedule_save(move || {
            f1.fetch_add(1, Ordering::SeqCst);
            vec![task("t1")]
        });
        // Landed inside the window: absorbed, its closure never runs.
        let f2 = fired.clone();
        storage.schedule_save(move || {
            f2.fetch_add(1, Ordering::SeqCst);
            vec![task("t2")]
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let loaded = storage.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].request_id, "t1");
    }

    #[tokio::test]
    async fn schedule_save_rearms_after_fire() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(storage_in(&dir));

        storage.schedule_save(|| vec![task("t1")]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        storage.schedule_save(|| vec![task("t1"), task("t2")]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(storage.load().unwrap().len(), 2);
    }
}
