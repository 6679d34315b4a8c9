//! In-memory task registry — the authoritative index of live tasks.
//!
//! Two maps behind one mutex: the task map keyed by `(client_id,
//! request_id)` and a one-way secondary index from the agent session id
//! to the task key. All mutations go through the task manager; the lock
//! is held only around map operations, never across I/O.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use tr_domain::{Error, Result, Task, TaskKey, TaskStatus};

struct RegistryInner {
    tasks: HashMap<TaskKey, Task>,
    sessions: HashMap<String, TaskKey>,
}

pub struct TaskRegistry {
    inner: Mutex<RegistryInner>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                tasks: HashMap::new(),
                sessions: HashMap::new(),
            }),
        }
    }

    /// Insert (or replace) a task. A replaced task's session-index entry
    /// is dropped; the new task's binding (restart recovery) is indexed.
    pub fn insert(&self, task: Task) {
        let key = task.key();
        let session_id = task.claude_session_id.clone();
        let mut inner = self.inner.lock();
        if let Some(old) = inner.tasks.insert(key.clone(), task) {
            if let Some(old_sid) = old.claude_session_id {
                inner.sessions.remove(&old_sid);
            }
        }
        if let Some(sid) = session_id {
            inner.sessions.insert(sid, key);
        }
    }

    /// Atomically create a running task for a key: fails with `conflict`
    /// when a running task already holds the key; a stale terminal
    /// record is replaced and returned for cleanup.
    pub fn insert_running(&self, task: Task) -> Result<Option<Task>> {
        let key = task.key();
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.tasks.get(&key) {
            if existing.status == TaskStatus::Running {
                return Err(Error::Conflict(format!(
                    "a running task already exists for {key}"
                )));
            }
        }
        let replaced = inner.tasks.insert(key, task);
        if let Some(old) = &replaced {
            if let Some(sid) = &old.claude_session_id {
                inner.sessions.remove(sid);
            }
        }
        Ok(replaced)
    }

    pub fn get(&self, key: &TaskKey) -> Option<Task> {
        self.inner.lock().tasks.get(key).cloned()
    }

    pub fn get_by_session(&self, session_id: &str) -> Option<Task> {
        let inner = self.inner.lock();
        let key = inner.sessions.get(session_id)?;
        inner.tasks.get(key).cloned()
    }

    pub fn resolve_session(&self, session_id: &str) -> Option<TaskKey> {
        self.inner.lock().sessions.get(session_id).cloned()
    }

    pub fn list_by_client(&self, client_id: &str) -> Vec<Task> {
        let inner = self.inner.lock();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.client_id == client_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// Mutate a task in place. Returns the updated task, or `None` if
    /// the key is unknown.
    pub fn update<F>(&self, key: &TaskKey, f: F) -> Option<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut inner = self.inner.lock();
        let task = inner.tasks.get_mut(key)?;
        f(task);
        Some(task.clone())
    }

    /// Remove a task; its session-index entry goes with it atomically.
    pub fn remove(&self, key: &TaskKey) -> Option<Task> {
        let mut inner = self.inner.lock();
        let task = inner.tasks.remove(key)?;
        if let Some(sid) = &task.claude_session_id {
            inner.sessions.remove(sid);
        }
        Some(task)
    }

    /// Record the agent session id for a task and index it. Exactly one
    /// index entry maps the session to this key afterwards.
    pub fn bind_session(&self, key: &TaskKey, session_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(task) = inner.tasks.get_mut(key) else {
            return false;
        };
        task.claude_session_id = Some(session_id.to_owned());
        inner.sessions.insert(session_id.to_owned(), key.clone());
        true
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.inner.lock().tasks.values().cloned().collect()
    }

    /// Terminal tasks whose terminal timestamp is older than `cutoff`.
    pub fn terminal_older_than(&self, cutoff: DateTime<Utc>) -> Vec<TaskKey> {
        let inner = self.inner.lock();
        inner
            .tasks
            .values()
            .filter(|t| {
                t.status.is_terminal()
                    && t.completed_at.is_some_and(|ts| ts < cutoff)
            })
            .map(|t| t.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn session_index_len(&self) -> usize {
        self.inner.lock().sessions.len()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
