//! Configuration for the channel bus and the job queue.

use core_config::{env_or_default, env_parse_or, ConfigError, FromEnv};
use std::time::Duration;

const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 2000;

/// Job queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Key prefix for job records, records live at `{prefix}:job:{id}`
    pub prefix: String,

    /// Worker ID used in logs
    pub worker_id: String,

    /// Upper bound for every store call
    pub operation_timeout: Duration,

    /// Write job records to the store when one is attached
    pub persist_jobs: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            prefix: "q".to_string(),
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            persist_jobs: true,
        }
    }
}

impl QueueConfig {
    /// Create a new queue config with the given key prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// Set the worker ID.
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Set the store operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Enable or disable job record persistence.
    pub fn with_persist_jobs(mut self, persist: bool) -> Self {
        self.persist_jobs = persist;
        self
    }

    /// Store key of a job record.
    pub fn job_key(&self, id: u64) -> String {
        format!("{}:job:{}", self.prefix, id)
    }
}

impl FromEnv for QueueConfig {
    /// Environment variables:
    /// - `QUEUE_PREFIX` (default `q`)
    /// - `QUEUE_OPERATION_TIMEOUT_MS` (default 2000)
    /// - `QUEUE_PERSIST_JOBS` (default true)
    fn from_env() -> Result<Self, ConfigError> {
        let timeout_ms = env_parse_or("QUEUE_OPERATION_TIMEOUT_MS", DEFAULT_OPERATION_TIMEOUT_MS)?;

        Ok(Self::new(env_or_default("QUEUE_PREFIX", "q"))
            .with_operation_timeout(Duration::from_millis(timeout_ms))
            .with_persist_jobs(env_parse_or("QUEUE_PERSIST_JOBS", true)?))
    }
}

/// Channel bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Upper bound for every transport call
    pub operation_timeout: Duration,

    /// How many self-published messages per bridged channel are remembered
    /// for echo suppression
    pub echo_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            echo_capacity: 1024,
        }
    }
}

impl BusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_echo_capacity(mut self, capacity: usize) -> Self {
        self.echo_capacity = capacity;
        self
    }
}

impl FromEnv for BusConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let timeout_ms = env_parse_or("BUS_OPERATION_TIMEOUT_MS", DEFAULT_OPERATION_TIMEOUT_MS)?;
        Ok(Self::new().with_operation_timeout(Duration::from_millis(timeout_ms)))
    }
}
