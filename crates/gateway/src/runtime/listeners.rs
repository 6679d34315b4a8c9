//! Listener fan-out — per-task bounded queues feeding SSE writers.
//!
//! Broadcast never blocks: each listener gets a non-blocking enqueue,
//! and a listener whose queue is full is dropped on the spot (its
//! channel closes, which terminates the SSE writer). A dropped consumer
//! reconnects through the replay path; the executor never waits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use tr_domain::{StoredEvent, TaskKey};

pub type ListenerId = u64;

struct Listener {
    id: ListenerId,
    tx: mpsc::Sender<StoredEvent>,
}

pub struct ListenerManager {
    queue_capacity: usize,
    inner: Mutex<HashMap<TaskKey, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl ListenerManager {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
            inner: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach a fresh bounded queue to a task. The receiver belongs to
    /// the SSE writer; dropping it lets broadcast clean the entry up.
    pub fn add(&self, key: &TaskKey) -> (ListenerId, mpsc::Receiver<StoredEvent>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock()
            .entry(key.clone())
            .or_default()
            .push(Listener { id, tx });
        (id, rx)
    }

    pub fn remove(&self, key: &TaskKey, id: ListenerId) {
        let mut inner = self.inner.lock();
        if let Some(listeners) = inner.get_mut(key) {
            listeners.retain(|l| l.id != id);
            if listeners.is_empty() {
                inner.remove(key);
            }
        }
    }

    /// Deliver one event to every listener of a task. Slow (full) and
    /// hung-up listeners are dropped; their queues close as the signal.
    pub fn broadcast(&self, key: &TaskKey, event: &StoredEvent) {
        let mut inner = self.inner.lock();
        let Some(listeners) = inner.get_mut(key) else {
            return;
        };
        listeners.retain(|listener| match listener.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(task = %key, listener = listener.id, "dropping slow listener");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if listeners.is_empty() {
            inner.remove(key);
        }
    }

    /// Push an event to one specific listener (reconnect snapshots).
    pub fn send_to(&self, key: &TaskKey, id: ListenerId, event: StoredEvent) -> bool {
        let inner = self.inner.lock();
        inner
            .get(key)
            .and_then(|ls| ls.iter().find(|l| l.id == id))
            .map(|l| l.tx.try_send(event).is_ok())
            .unwrap_or(false)
    }

    /// Drop every listener of a task; their queues close once drained.
    pub fn close_all(&self, key: &TaskKey) {
        self.inner.lock().remove(key);
    }

    pub fn count(&self, key: &TaskKey) -> usize {
        self.inner.lock().get(key).map_or(0, |ls| ls.len())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
