//! Per-task cancellation tokens.
//!
//! Each running executor registers a token keyed by its task; explicit
//! shutdown cancels them all and the executors wind down cooperatively.

use std::collections::HashMap;

use parking_lot::Mutex;

use tr_domain::{CancelToken, TaskKey};

pub struct CancelMap {
    tokens: Mutex<HashMap<TaskKey, CancelToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a token for a task.
    pub fn register(&self, key: &TaskKey) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(key.clone(), token.clone());
        token
    }

    /// Signal one task. Returns true if a token was found.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        match self.tokens.lock().get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Signal every registered task; returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let tokens = self.tokens.lock();
        for token in tokens.values() {
            token.cancel();
        }
        tokens.len()
    }

    /// Remove a task's token (execution finished).
    pub fn remove(&self, key: &TaskKey) {
        self.tokens.lock().remove(key);
    }

    pub fn active(&self) -> usize {
        self.tokens.lock().len()
    }
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}
