//! Shared domain types for TaskRelay.
//!
//! Everything the gateway and the engine agree on lives here: the task
//! model, the event taxonomy, the error taxonomy, cancellation, and
//! configuration. This crate stays dependency-light on purpose — no
//! tokio, no HTTP.

pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod task;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use event::{StoredEvent, TaskEvent};
pub use task::{InterventionMessage, Task, TaskKey, TaskStatus};
