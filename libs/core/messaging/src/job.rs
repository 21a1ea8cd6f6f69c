//! Job handle, status and per-job observers.

use crate::error::{panic_message, JobError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::warn;

/// Job payload: field name to value.
pub type Payload = Map<String, Value>;

type CompleteObserver = Box<dyn FnOnce(&Job) + Send>;
type FailedObserver = Box<dyn FnOnce(&Job, &JobError) + Send>;

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a job's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTransition {
    pub status: JobStatus,
    pub at: DateTime<Utc>,
}

/// Terminal result of a job, as returned by [`Job::wait`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(JobError),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed)
    }
}

/// Serializable snapshot of a job, as written to the key-value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: u64,
    pub job_type: String,
    pub payload: Payload,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct JobState {
    status: JobStatus,
    error: Option<JobError>,
    history: Vec<JobTransition>,
    on_complete: Vec<CompleteObserver>,
    on_failed: Vec<FailedObserver>,
}

struct JobInner {
    id: u64,
    job_type: String,
    payload: Payload,
    state: Mutex<JobState>,
    outcome: watch::Sender<Option<JobOutcome>>,
}

/// Handle to an enqueued job.
///
/// Cloning is cheap and every clone observes the same job.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    pub(crate) fn new(id: u64, job_type: impl Into<String>, payload: Payload) -> Self {
        let (outcome, _rx) = watch::channel(None);
        Self {
            inner: Arc::new(JobInner {
                id,
                job_type: job_type.into(),
                payload,
                state: Mutex::new(JobState {
                    status: JobStatus::Pending,
                    error: None,
                    history: vec![JobTransition {
                        status: JobStatus::Pending,
                        at: Utc::now(),
                    }],
                    on_complete: Vec::new(),
                    on_failed: Vec::new(),
                }),
                outcome,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn job_type(&self) -> &str {
        &self.inner.job_type
    }

    pub fn payload(&self) -> &Payload {
        &self.inner.payload
    }

    pub fn status(&self) -> JobStatus {
        self.state().status
    }

    /// Failure reason once the job has failed.
    pub fn error(&self) -> Option<JobError> {
        self.state().error.clone()
    }

    pub fn history(&self) -> Vec<JobTransition> {
        self.state().history.clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.state().history[0].at
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Snapshot suitable for persistence.
    pub fn record(&self) -> JobRecord {
        let state = self.state();
        let created_at = state.history[0].at;
        let updated_at = state.history.last().map(|t| t.at).unwrap_or(created_at);
        JobRecord {
            id: self.inner.id,
            job_type: self.inner.job_type.clone(),
            payload: self.inner.payload.clone(),
            status: state.status,
            error: state.error.as_ref().map(|e| e.to_string()),
            created_at,
            updated_at,
        }
    }

    /// Register a callback for successful completion.
    ///
    /// Fires exactly once: at the transition, or right away if the job has
    /// already completed. Never fires if the job fails.
    pub fn on_complete<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Job) + Send + 'static,
    {
        let mut state = self.state();
        match state.status {
            JobStatus::Completed => {
                drop(state);
                self.notify(|| callback(self));
            }
            JobStatus::Failed => {}
            _ => state.on_complete.push(Box::new(callback)),
        }
        self
    }

    /// Register a callback for failure, receiving the reason.
    ///
    /// Fires exactly once: at the transition, or right away if the job has
    /// already failed. Never fires if the job completes.
    pub fn on_failed<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Job, &JobError) + Send + 'static,
    {
        let mut state = self.state();
        match (state.status, state.error.clone()) {
            (JobStatus::Failed, Some(err)) => {
                drop(state);
                self.notify(|| callback(self, &err));
            }
            (JobStatus::Completed, _) | (JobStatus::Failed, None) => {}
            _ => state.on_failed.push(Box::new(callback)),
        }
        self
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&self) -> JobOutcome {
        let mut rx = self.inner.outcome.subscribe();
        let result = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        // the sender lives as long as this handle, so the fallback is unreachable
        result.unwrap_or(JobOutcome::Failed(JobError::Cancelled))
    }

    /// `pending` -> `active`. Returns false for any other starting state.
    pub(crate) fn mark_active(&self) -> bool {
        let mut state = self.state();
        if state.status != JobStatus::Pending {
            return false;
        }
        state.status = JobStatus::Active;
        state.history.push(JobTransition {
            status: JobStatus::Active,
            at: Utc::now(),
        });
        true
    }

    /// Terminal transition to `completed`; observers run outside the lock.
    pub(crate) fn complete(&self) -> bool {
        let observers = {
            let mut state = self.state();
            if state.status.is_terminal() {
                return false;
            }
            state.status = JobStatus::Completed;
            state.history.push(JobTransition {
                status: JobStatus::Completed,
                at: Utc::now(),
            });
            state.on_failed.clear();
            std::mem::take(&mut state.on_complete)
        };

        self.inner.outcome.send_replace(Some(JobOutcome::Completed));
        for observer in observers {
            self.notify(|| observer(self));
        }
        true
    }

    /// Terminal transition to `failed`; observers run outside the lock.
    pub(crate) fn fail(&self, error: JobError) -> bool {
        let observers = {
            let mut state = self.state();
            if state.status.is_terminal() {
                return false;
            }
            state.status = JobStatus::Failed;
            state.error = Some(error.clone());
            state.history.push(JobTransition {
                status: JobStatus::Failed,
                at: Utc::now(),
            });
            state.on_complete.clear();
            std::mem::take(&mut state.on_failed)
        };

        self.inner
            .outcome
            .send_replace(Some(JobOutcome::Failed(error.clone())));
        for observer in observers {
            self.notify(|| observer(self, &error));
        }
        true
    }

    /// Run one observer; a panic is logged and does not reach the caller.
    fn notify<F: FnOnce()>(&self, observer: F) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(observer)) {
            warn!(
                job_id = self.inner.id,
                error = %panic_message(panic),
                "Job observer panicked"
            );
        }
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        // observers never run under this lock, recover from poisoning
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("job_type", &self.inner.job_type)
            .field("status", &self.status())
            .finish()
    }
}
