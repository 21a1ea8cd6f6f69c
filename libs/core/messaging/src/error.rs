//! Error types for the channel bus and the job queue.

use std::any::Any;
use thiserror::Error;

/// Errors returned by bus, queue and backend operations.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Store or transport unreachable, disconnected or too slow to answer.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The store answered with an error that is not a connection problem.
    #[error("store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The component was closed; no further operations are accepted.
    #[error("closed")]
    Closed,

    /// Configuration or wiring error
    #[error("configuration error: {0}")]
    Config(String),

    /// One or more listeners failed while a message was being delivered.
    #[error("{} listener(s) failed on channel '{channel}'", failures.len())]
    Delivery {
        channel: String,
        failures: Vec<DeliveryError>,
    },

    /// The worker task stopped abnormally.
    #[error("worker error: {0}")]
    Worker(String),
}

impl MessagingError {
    /// Create a connectivity error.
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity(message.into())
    }

    /// Check if this is a connectivity error.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, MessagingError::Connectivity(_))
    }
}

impl From<core_config::ConfigError> for MessagingError {
    fn from(err: core_config::ConfigError) -> Self {
        MessagingError::Config(err.to_string())
    }
}

/// Why a job ended in the `failed` state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// No handler was registered for the job's type.
    #[error("no handler registered for job type '{job_type}'")]
    NoHandler { job_type: String },

    /// The handler returned an error or panicked.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The queue was torn down while the job was still pending.
    #[error("cancelled")]
    Cancelled,
}

impl JobError {
    /// Create a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

/// A listener failed while receiving a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("listener {subscription} on channel '{channel}' failed: {message}")]
pub struct DeliveryError {
    pub channel: String,
    pub subscription: u64,
    pub message: String,
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
