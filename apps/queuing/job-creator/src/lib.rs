//! Job Creator
//!
//! Enqueues one `push_notification_code` job and processes it with an
//! in-process worker. Job records are kept in Redis under the queue prefix.
//!
//! ```text
//! enqueue(push_notification_code, {phoneNumber, message})
//!   ↓
//! JobQueue worker → push notification handler
//!   ↓
//! complete / failed observers
//! ```

use core_config::{tracing::install_color_eyre, Environment, FromEnv, RedisConfig};
use eyre::{Result, WrapErr};
use messaging::redis::RedisConnection;
use messaging::{Job, JobError, JobOutcome, JobQueue, MessagingError, Payload, QueueConfig};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub const JOB_TYPE: &str = "push_notification_code";

/// How long `run` waits for the job before giving up.
const JOB_TIMEOUT: Duration = Duration::from_secs(30);

/// Payload for a notification job.
pub fn notification_payload(phone_number: &str, message: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert("phoneNumber".to_string(), Value::from(phone_number));
    payload.insert("message".to_string(), Value::from(message));
    payload
}

/// Handle `push_notification_code` jobs on `queue`.
pub fn register_push_notification_handler(queue: &JobQueue) {
    queue.register_fn(JOB_TYPE, |job: Job| async move {
        let field = |name: &str| {
            job.payload()
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| JobError::handler(format!("payload is missing '{}'", name)))
        };
        let phone_number = field("phoneNumber")?;
        let message = field("message")?;

        info!(
            job_id = job.id(),
            "Sending notification to {}, with message: {}", phone_number, message
        );
        Ok::<(), JobError>(())
    });
}

/// Enqueue a notification job and attach the logging observers.
pub async fn create_notification_job(
    queue: &JobQueue,
    payload: Payload,
) -> Result<Job, MessagingError> {
    let job = queue.enqueue(JOB_TYPE, payload).await?;
    info!("Notification job created: {}", job.id());

    job.on_complete(|job| info!(job_id = job.id(), "Notification job completed"))
        .on_failed(|job, err| error!(job_id = job.id(), error = %err, "Notification job failed"));

    Ok(job)
}

pub async fn run() -> Result<()> {
    install_color_eyre();
    core_config::tracing::init_tracing(&Environment::from_env());

    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;
    let queue_config = QueueConfig::from_env().wrap_err("Failed to load queue configuration")?;

    let connection = RedisConnection::open(&redis_config)
        .await
        .wrap_err("Failed to connect to Redis")?;

    let queue = JobQueue::with_store(Arc::new(connection.store()), queue_config);
    register_push_notification_handler(&queue);
    let worker = queue.start();

    let payload = notification_payload("+2775412522", "Thank you for contacting us.");
    let outcome = match create_notification_job(&queue, payload).await {
        Ok(job) => tokio::time::timeout(JOB_TIMEOUT, job.wait()).await.ok(),
        Err(e) => {
            error!(error = %e, "Failed to create notification job");
            None
        }
    };

    worker.shutdown().await.wrap_err("Job queue worker failed")?;
    connection.close();

    match outcome {
        Some(JobOutcome::Completed) => Ok(()),
        Some(JobOutcome::Failed(err)) => Err(eyre::eyre!("Notification job failed: {}", err)),
        None => Err(eyre::eyre!("Notification job did not finish")),
    }
}
