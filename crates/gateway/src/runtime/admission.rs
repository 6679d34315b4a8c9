//! Resource admission — a counting gate on concurrent executions.
//!
//! Permits are RAII: dropping an [`AdmissionPermit`] releases the slot
//! on every exit path (success, error, panic), so admission can never
//! leak. Counters are exposed for the health endpoint.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use tr_domain::{Error, Result};

pub struct ResourceAdmission {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Holds one execution slot; released on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl ResourceAdmission {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Non-blocking acquire.
    pub fn try_acquire(&self) -> Option<AdmissionPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    /// Wait up to `timeout` for a slot.
    pub async fn acquire(&self, timeout: Duration) -> Result<AdmissionPermit> {
        let acquired = tokio::time::timeout(
            timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await;
        match acquired {
            Ok(Ok(permit)) => Ok(AdmissionPermit { _permit: permit }),
            Ok(Err(_)) => Err(Error::Internal("admission semaphore closed".into())),
            Err(_) => Err(Error::RateLimited(format!(
                "no execution slot available within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
