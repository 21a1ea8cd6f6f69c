//! Job handlers.

use crate::error::JobError;
use crate::job::Job;
use async_trait::async_trait;
use std::future::Future;

/// Performs the work for one job type.
///
/// Return `Err` to fail the job; the reason is handed to the job's failure
/// observers. Panics are caught by the worker and treated the same way.
///
/// # Example
///
/// ```rust,ignore
/// use messaging::{Job, JobError, JobHandler};
/// use async_trait::async_trait;
///
/// struct PushNotificationHandler {
///     gateway: Arc<dyn SmsGateway>,
/// }
///
/// #[async_trait]
/// impl JobHandler for PushNotificationHandler {
///     fn job_type(&self) -> &str {
///         "push_notification_code"
///     }
///
///     async fn handle(&self, job: &Job) -> Result<(), JobError> {
///         let phone = job.payload()["phoneNumber"].as_str()
///             .ok_or_else(|| JobError::handler("missing phoneNumber"))?;
///         self.gateway.send(phone, "Thank you for contacting us.").await
///             .map_err(|e| JobError::handler(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Job type this handler is registered for.
    fn job_type(&self) -> &str;

    /// Process one job.
    async fn handle(&self, job: &Job) -> Result<(), JobError>;

    /// Handler name used in logs. Defaults to the job type.
    fn name(&self) -> &str {
        self.job_type()
    }
}

/// Handler backed by an async closure.
pub struct FnHandler<F> {
    job_type: String,
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    pub fn new(job_type: impl Into<String>, f: F) -> Self {
        Self {
            job_type: job_type.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    fn job_type(&self) -> &str {
        &self.job_type
    }

    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        (self.f)(job.clone()).await
    }
}

/// A handler that accepts every job (for testing).
#[derive(Debug, Clone)]
pub struct NoOpHandler {
    job_type: String,
}

impl NoOpHandler {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
        }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    async fn handle(&self, _job: &Job) -> Result<(), JobError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop_handler"
    }
}

/// A handler that always fails.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct FailingHandler {
    job_type: String,
    reason: String,
}

#[cfg(test)]
impl FailingHandler {
    pub(crate) fn new(job_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl JobHandler for FailingHandler {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    async fn handle(&self, _job: &Job) -> Result<(), JobError> {
        Err(JobError::Handler(self.reason.clone()))
    }

    fn name(&self) -> &str {
        "failing_handler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Payload;

    #[tokio::test]
    async fn test_noop_handler() {
        let handler = NoOpHandler::new("push_notification_code");
        let job = Job::new(1, "push_notification_code", Payload::new());

        assert!(handler.handle(&job).await.is_ok());
        assert_eq!(handler.job_type(), "push_notification_code");
        assert_eq!(handler.name(), "noop_handler");
    }

    #[tokio::test]
    async fn test_failing_handler() {
        let handler = FailingHandler::new("t", "gateway down");
        let job = Job::new(1, "t", Payload::new());

        let err = handler.handle(&job).await.unwrap_err();
        assert_eq!(err, JobError::Handler("gateway down".into()));
    }

    #[tokio::test]
    async fn test_fn_handler_sees_job() {
        let handler = FnHandler::new("t", |job: Job| async move {
            if job.id() == 1 {
                Ok(())
            } else {
                Err(JobError::handler("unexpected id"))
            }
        });

        assert!(handler.handle(&Job::new(1, "t", Payload::new())).await.is_ok());
        assert!(handler.handle(&Job::new(2, "t", Payload::new())).await.is_err());
        assert_eq!(handler.name(), "t");
    }
}
