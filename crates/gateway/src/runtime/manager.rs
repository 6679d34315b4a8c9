//! The task manager — the façade the HTTP layer talks to.
//!
//! Composes the event store, the debounced snapshot storage, the
//! registry, the listener fan-out, resource admission, the runner pool
//! and the per-task executor, and owns the task lifecycle:
//!
//! ```text
//!         create                complete/error
//!   ∅ ────────▶ running ────────────────▶ terminal ──ack──▶ ∅
//!                  │
//!               (interventions allowed only here)
//! ```
//!
//! Once terminal, only `delivered_at` may still change (exactly once).
//! One mutex guards the task map + session index; saves are debounced
//! off the critical path; no two locks are ever held at once.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tr_domain::config::Config;
use tr_domain::task::TaskOptions;
use tr_domain::{
    Error, InterventionMessage, Result, StoredEvent, Task, TaskEvent, TaskKey, TaskStatus,
};
use tr_engine::RunnerPool;

use super::admission::ResourceAdmission;
use super::cancel::CancelMap;
use super::event_store::EventStore;
use super::executor;
use super::listeners::{ListenerId, ListenerManager};
use super::registry::TaskRegistry;
use super::task_storage::TaskStorage;

/// Synchronous hook invoked around task execution.
pub type TaskHook = Box<dyn Fn(&Task) + Send + Sync>;

pub struct TaskManager {
    config: Arc<Config>,
    registry: Arc<TaskRegistry>,
    events: EventStore,
    storage: Arc<TaskStorage>,
    listeners: ListenerManager,
    admission: ResourceAdmission,
    pool: Arc<RunnerPool>,
    cancels: CancelMap,
    interventions: Mutex<HashMap<TaskKey, VecDeque<InterventionMessage>>>,
    handles: Mutex<HashMap<TaskKey, JoinHandle<()>>>,
    pre_execute: Option<TaskHook>,
    post_execute: Option<TaskHook>,
    shutting_down: AtomicBool,
}

impl TaskManager {
    /// Build the manager from config, loading the snapshot and marking
    /// tasks interrupted by a crash as errored.
    pub fn new(config: Arc<Config>, pool: Arc<RunnerPool>) -> Result<Self> {
        let storage = Arc::new(TaskStorage::new(
            config.storage.tasks_file.clone(),
            config.storage.save_debounce(),
        ));
        let events = EventStore::new(
            config.storage.events_dir.clone(),
            config.storage.fsync_events,
        );
        let registry = Arc::new(TaskRegistry::new());

        let mut interrupted = 0usize;
        for mut task in storage.load()? {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Error;
                task.error = Some("interrupted by server restart".into());
                task.completed_at = Some(Utc::now());
                interrupted += 1;
            }
            registry.insert(task);
        }
        if interrupted > 0 {
            tracing::warn!(interrupted, "marked crashed tasks as errored");
            storage.save(&registry.snapshot())?;
        }
        tracing::info!(tasks = registry.len(), "task manager loaded");

        let admission = ResourceAdmission::new(config.admission.max_concurrent);

        Ok(Self {
            config: config.clone(),
            registry,
            events,
            storage,
            listeners: ListenerManager::new(config.listeners.queue_capacity),
            admission,
            pool,
            cancels: CancelMap::new(),
            interventions: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            pre_execute: None,
            post_execute: None,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Install the pre-/post-execute hook points (composition root).
    pub fn set_hooks(&mut self, pre: Option<TaskHook>, post: Option<TaskHook>) {
        self.pre_execute = pre;
        self.post_execute = post;
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Lifecycle operations
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Create a task and start executing it in the background.
    ///
    /// At most one running task may exist per key (`conflict`
    /// otherwise); a still-present terminal record for the key is
    /// overwritten and its event log deleted.
    pub async fn create(
        self: &Arc<Self>,
        key: TaskKey,
        prompt: String,
        opts: TaskOptions,
    ) -> Result<Task> {
        let task = Task::new(key.clone(), prompt, opts);
        let replaced = self.registry.insert_running(task.clone())?;
        if replaced.is_some() {
            if let Err(e) = self.events.delete_session(&key).await {
                tracing::warn!(task = %key, error = %e, "deleting stale event log failed");
            }
        }

        self.interventions
            .lock()
            .insert(key.clone(), VecDeque::new());
        let cancel = self.cancels.register(&key);

        if let Some(hook) = &self.pre_execute {
            hook(&task);
        }
        self.schedule_save();

        let handle = executor::spawn(Arc::clone(self), task.clone(), cancel);
        self.handles.lock().insert(key.clone(), handle);

        tracing::info!(task = %key, "task created");
        Ok(task)
    }

    pub fn get(&self, key: &TaskKey) -> Result<Task> {
        self.registry
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("no task for {key}")))
    }

    pub fn get_by_session(&self, session_id: &str) -> Result<Task> {
        self.registry
            .get_by_session(session_id)
            .ok_or_else(|| Error::NotFound(format!("no task for session {session_id}")))
    }

    pub fn list_by_client(&self, client_id: &str) -> Vec<Task> {
        self.registry.list_by_client(client_id)
    }

    /// Drive a task to `completed`. Fails on unknown keys and on tasks
    /// that are already terminal.
    pub fn complete(
        &self,
        key: &TaskKey,
        result: String,
        session_id: Option<String>,
    ) -> Result<Task> {
        let mut already_terminal = false;
        let updated = self.registry.update(key, |t| {
            if t.status.is_terminal() {
                already_terminal = true;
                return;
            }
            t.status = TaskStatus::Completed;
            t.result = Some(result.clone());
            t.completed_at = Some(Utc::now());
        });
        let task = updated.ok_or_else(|| Error::NotFound(format!("no task for {key}")))?;
        if already_terminal {
            return Err(Error::NotRunning(format!("task {key} is already terminal")));
        }
        if let Some(sid) = session_id {
            self.registry.bind_session(key, &sid);
        }
        self.schedule_save();
        Ok(task)
    }

    /// Drive a task to `error`. Fails on unknown keys and on tasks that
    /// are already terminal.
    pub fn error(&self, key: &TaskKey, message: String) -> Result<Task> {
        let mut already_terminal = false;
        let updated = self.registry.update(key, |t| {
            if t.status.is_terminal() {
                already_terminal = true;
                return;
            }
            t.status = TaskStatus::Error;
            t.error = Some(message.clone());
            t.completed_at = Some(Utc::now());
        });
        let task = updated.ok_or_else(|| Error::NotFound(format!("no task for {key}")))?;
        if already_terminal {
            return Err(Error::NotRunning(format!("task {key} is already terminal")));
        }
        self.schedule_save();
        Ok(task)
    }

    /// Acknowledge delivery: delete the task and its event log. A task
    /// still running cannot be acked.
    pub async fn ack(&self, key: &TaskKey) -> Result<Task> {
        let task = self.get(key)?;
        if task.status == TaskStatus::Running {
            return Err(Error::Conflict(format!(
                "task {key} is still running; ack requires a terminal task"
            )));
        }
        let removed = self
            .registry
            .remove(key)
            .ok_or_else(|| Error::NotFound(format!("no task for {key}")))?;
        self.interventions.lock().remove(key);
        if let Err(e) = self.events.delete_session(key).await {
            tracing::warn!(task = %key, error = %e, "deleting event log failed");
        }
        self.schedule_save();
        tracing::info!(task = %key, "task acked and deleted");
        Ok(removed)
    }

    /// Record that the terminal result was handed to the client.
    /// Allowed exactly once.
    pub fn mark_delivered(&self, key: &TaskKey) -> Result<Task> {
        let mut already_delivered = false;
        let updated = self.registry.update(key, |t| {
            if t.delivered_at.is_some() {
                already_delivered = true;
                return;
            }
            t.delivered_at = Some(Utc::now());
        });
        let task = updated.ok_or_else(|| Error::NotFound(format!("no task for {key}")))?;
        if already_delivered {
            return Err(Error::Conflict(format!("task {key} already delivered")));
        }
        self.schedule_save();
        Ok(task)
    }

    /// Delete terminal tasks older than `max_age`; returns the count.
    pub async fn cleanup_old(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let expired = self.registry.terminal_older_than(cutoff);
        let mut deleted = 0;
        for key in expired {
            if self.registry.remove(&key).is_none() {
                continue;
            }
            self.interventions.lock().remove(&key);
            if let Err(e) = self.events.delete_session(&key).await {
                tracing::warn!(task = %key, error = %e, "deleting event log failed");
            }
            deleted += 1;
        }
        if deleted > 0 {
            self.schedule_save();
        }
        deleted
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Interventions
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Queue an intervention for a running task.
    pub fn add_intervention(&self, key: &TaskKey, msg: InterventionMessage) -> Result<()> {
        let task = self.get(key)?;
        if task.status.is_terminal() {
            return Err(Error::NotRunning(format!(
                "task {key} is terminal; interventions need a running task"
            )));
        }
        self.interventions
            .lock()
            .entry(key.clone())
            .or_default()
            .push_back(msg);
        Ok(())
    }

    /// Queue an intervention, addressed by the agent session id. The
    /// session route has priority: it resolves through the session
    /// index only.
    pub fn add_intervention_by_session(
        &self,
        session_id: &str,
        msg: InterventionMessage,
    ) -> Result<()> {
        let key = self
            .registry
            .resolve_session(session_id)
            .ok_or_else(|| Error::NotFound(format!("no task for session {session_id}")))?;
        self.add_intervention(&key, msg)
    }

    /// Next queued intervention, if any (non-blocking; adapter hook).
    pub fn get_intervention(&self, key: &TaskKey) -> Option<InterventionMessage> {
        self.interventions.lock().get_mut(key)?.pop_front()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Listeners & events
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn add_listener(&self, key: &TaskKey) -> (ListenerId, mpsc::Receiver<StoredEvent>) {
        self.listeners.add(key)
    }

    pub fn remove_listener(&self, key: &TaskKey, id: ListenerId) {
        self.listeners.remove(key, id);
    }

    /// Status snapshot a reconnecting client renders before replay.
    /// Delivered as an unlogged meta event (id 0).
    pub fn reconnect_status(&self, key: &TaskKey) -> Option<StoredEvent> {
        let task = self.registry.get(key)?;
        let data = serde_json::json!({
            "status": task.status,
            "result": task.result,
            "error": task.error,
            "claude_session_id": task.claude_session_id,
        });
        Some(StoredEvent::meta(TaskEvent::Debug {
            message: "reconnect".into(),
            data: Some(data),
        }))
    }

    pub async fn read_events_since(
        &self,
        key: &TaskKey,
        after_id: u64,
    ) -> Result<Vec<StoredEvent>> {
        self.events.read_since(key, after_id).await
    }

    /// Persist an event and fan it out; the stored id is the SSE id.
    pub(crate) async fn append_and_broadcast(
        &self,
        key: &TaskKey,
        event: TaskEvent,
    ) -> Result<u64> {
        let id = self.events.append(key, event.clone()).await?;
        self.listeners.broadcast(key, &StoredEvent::new(id, event));
        Ok(id)
    }

    pub(crate) fn bind_session(&self, key: &TaskKey, session_id: &str) {
        if self.registry.bind_session(key, session_id) {
            self.schedule_save();
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Executor finalization
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Terminal transition to `completed`: append + broadcast the
    /// `complete` event, then tear the execution state down.
    pub(crate) async fn finalize_complete(
        &self,
        key: &TaskKey,
        result: String,
        attachments: Vec<String>,
    ) {
        let mut transitioned = false;
        self.registry.update(key, |t| {
            if t.status.is_terminal() {
                return;
            }
            t.status = TaskStatus::Completed;
            t.result = Some(result.clone());
            t.attachments = attachments.clone();
            t.completed_at = Some(Utc::now());
            transitioned = true;
        });
        if transitioned {
            let event = TaskEvent::Complete { result, attachments };
            if let Err(e) = self.append_and_broadcast(key, event).await {
                tracing::warn!(task = %key, error = %e, "recording complete event failed");
            }
            tracing::info!(task = %key, "task completed");
        }
        self.teardown_execution(key);
    }

    /// Terminal transition to `error` with the given kind.
    pub(crate) async fn finalize_error(&self, key: &TaskKey, kind: &str, message: String) {
        let mut transitioned = false;
        self.registry.update(key, |t| {
            if t.status.is_terminal() {
                return;
            }
            t.status = TaskStatus::Error;
            t.error = Some(message.clone());
            t.completed_at = Some(Utc::now());
            transitioned = true;
        });
        if transitioned {
            let event = TaskEvent::Error { kind: kind.into(), message: message.clone() };
            if let Err(e) = self.append_and_broadcast(key, event).await {
                tracing::warn!(task = %key, error = %e, "recording error event failed");
            }
            tracing::info!(task = %key, kind, "task errored");
        }
        self.teardown_execution(key);
    }

    fn teardown_execution(&self, key: &TaskKey) {
        self.listeners.close_all(key);
        self.cancels.remove(key);
        self.interventions.lock().remove(key);
        self.handles.lock().remove(key);
        if let Some(hook) = &self.post_execute {
            if let Some(task) = self.registry.get(key) {
                hook(&task);
            }
        }
        self.schedule_save();
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Shutdown & persistence
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Signal every running executor, then wait up to `timeout` for
    /// them to wind down. Returns how many were signalled.
    pub async fn cancel_running(&self, timeout: Duration) -> usize {
        self.begin_shutdown();
        let signalled = self.cancels.cancel_all();
        let handles: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock();
            handles.drain().map(|(_, h)| h).collect()
        };
        if !handles.is_empty() {
            let drained =
                tokio::time::timeout(timeout, futures_util::future::join_all(handles)).await;
            if drained.is_err() {
                tracing::warn!("shutdown grace expired with executors still running");
            }
        }
        signalled
    }

    /// Force an immediate snapshot write (shutdown path).
    pub fn flush(&self) -> Result<()> {
        self.storage.flush(&self.registry.snapshot())
    }

    fn schedule_save(&self) {
        let registry = Arc::clone(&self.registry);
        self.storage.schedule_save(move || registry.snapshot());
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Accessors
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn admission(&self) -> &ResourceAdmission {
        &self.admission
    }

    pub fn pool(&self) -> Arc<RunnerPool> {
        Arc::clone(&self.pool)
    }
}
