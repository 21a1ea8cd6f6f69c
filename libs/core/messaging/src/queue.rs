//! FIFO job queue with a single worker loop.

use crate::config::QueueConfig;
use crate::error::{panic_message, JobError, MessagingError};
use crate::handler::{FnHandler, JobHandler};
use crate::job::{Job, JobRecord, JobStatus, Payload};
use crate::metrics;
use crate::store::KeyValueStore;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct QueueInner {
    pending: Mutex<VecDeque<Job>>,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    notify: Notify,
    next_id: AtomicU64,
    closed: AtomicBool,
    running: AtomicBool,
    store: Option<Arc<dyn KeyValueStore>>,
    config: QueueConfig,
}

/// Ordered queue of jobs processed one at a time, oldest first.
///
/// There are no priorities and no retries: a failed job stays failed.
///
/// # Example
///
/// ```rust,ignore
/// let queue = JobQueue::new();
/// queue.register_fn("push_notification_code", |job| async move {
///     send_sms(&job).await.map_err(|e| JobError::handler(e.to_string()))
/// });
///
/// let worker = queue.start();
/// let job = queue.enqueue("push_notification_code", payload).await?;
/// job.on_complete(|job| info!(id = job.id(), "Notification job completed"));
/// ```
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    /// In-memory queue without persistence.
    pub fn new() -> Self {
        Self::build(None, QueueConfig::default())
    }

    /// Queue that writes a [`JobRecord`] to `store` on enqueue and on every
    /// status change.
    pub fn with_store(store: Arc<dyn KeyValueStore>, config: QueueConfig) -> Self {
        Self::build(Some(store), config)
    }

    fn build(store: Option<Arc<dyn KeyValueStore>>, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                pending: Mutex::new(VecDeque::new()),
                handlers: RwLock::new(HashMap::new()),
                notify: Notify::new(),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                running: AtomicBool::new(false),
                store,
                config,
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Register the handler for its job type, replacing any previous one.
    pub fn register_handler<H>(&self, handler: H)
    where
        H: JobHandler + 'static,
    {
        let job_type = handler.job_type().to_string();
        let replaced = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(job_type.clone(), Arc::new(handler))
            .is_some();

        debug!(job_type = %job_type, replaced = replaced, "Handler registered");
    }

    /// Register an async closure as the handler for `job_type`.
    pub fn register_fn<F, Fut>(&self, job_type: &str, f: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        self.register_handler(FnHandler::new(job_type, f));
    }

    pub fn has_handler(&self, job_type: &str) -> bool {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(job_type)
    }

    /// Create a pending job and append it to the queue.
    ///
    /// Returns as soon as the job is queued. With a store attached the record
    /// is written first; if that write fails the job is not queued.
    pub async fn enqueue(&self, job_type: &str, payload: Payload) -> Result<Job, MessagingError> {
        if self.is_closed() {
            return Err(MessagingError::Closed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let job = Job::new(id, job_type, payload);

        if self.persists() {
            self.write_record(&job.record()).await?;
        }

        let queued = {
            let mut pending = self.pending();
            // re-checked under the lock so close() cannot miss this job
            if self.is_closed() {
                None
            } else {
                pending.push_back(job.clone());
                Some(pending.len())
            }
        };
        let Some(depth) = queued else {
            self.cancel(&job).await;
            return Err(MessagingError::Closed);
        };

        self.inner.notify.notify_one();
        metrics::job_enqueued(job_type);
        metrics::queue_depth(&self.inner.config.prefix, depth);
        debug!(job_id = id, job_type = %job_type, depth = depth, "Job enqueued");

        Ok(job)
    }

    /// Number of jobs waiting for the worker.
    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Read a persisted job record back from the store.
    pub async fn load_record(&self, id: u64) -> Result<Option<JobRecord>, MessagingError> {
        let store = self.inner.store.as_ref().ok_or_else(|| {
            MessagingError::Config("job queue has no store attached".to_string())
        })?;

        let key = self.inner.config.job_key(id);
        let raw = store
            .monitor()
            .guard("GET", self.inner.config.operation_timeout, store.get(&key))
            .await?;

        raw.map(|json| serde_json::from_str(&json).map_err(MessagingError::from))
            .transpose()
    }

    /// Run the worker loop until `shutdown` flips to true or the queue is
    /// closed.
    ///
    /// Jobs are processed one at a time; a job that is running when shutdown
    /// is requested finishes first. On exit the queue is closed and every job
    /// still pending fails as cancelled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), MessagingError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(MessagingError::Config(
                "job queue worker is already running".to_string(),
            ));
        }
        let _running = RunningFlag(&self.inner.running);

        info!(
            worker_id = %self.inner.config.worker_id,
            prefix = %self.inner.config.prefix,
            persist = self.persists(),
            "Starting job queue worker"
        );

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }
            if self.is_closed() {
                break;
            }

            let next = self.pending().pop_front();
            match next {
                Some(job) => self.process(job).await,
                None => {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                info!("Shutdown channel dropped, stopping worker");
                                break;
                            }
                        }
                        _ = self.inner.notify.notified() => {}
                    }
                }
            }
        }

        self.close().await;
        info!(worker_id = %self.inner.config.worker_id, "Job queue worker stopped");
        Ok(())
    }

    /// Spawn the worker loop on the current runtime.
    pub fn start(&self) -> WorkerHandle {
        let (shutdown, rx) = watch::channel(false);
        let queue = self.clone();
        let task = tokio::spawn(async move { queue.run(rx).await });
        WorkerHandle { shutdown, task }
    }

    /// Stop accepting jobs and fail every pending job as cancelled.
    ///
    /// A job the worker is currently running is not interrupted.
    pub async fn close(&self) {
        let drained: Vec<Job> = {
            let mut pending = self.pending();
            self.inner.closed.store(true, Ordering::SeqCst);
            pending.drain(..).collect()
        };
        self.inner.notify.notify_one();

        if !drained.is_empty() {
            info!(cancelled = drained.len(), "Cancelling pending jobs");
        }
        for job in &drained {
            self.cancel(job).await;
        }
        metrics::queue_depth(&self.inner.config.prefix, 0);
    }

    async fn process(&self, job: Job) {
        if !job.mark_active() {
            return;
        }
        metrics::queue_depth(&self.inner.config.prefix, self.pending_len());
        self.persist(&job).await;

        let handler = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(job.job_type())
            .cloned();

        let started = Instant::now();
        let result = match &handler {
            Some(handler) => {
                debug!(job_id = job.id(), handler = %handler.name(), "Processing job");
                AssertUnwindSafe(handler.handle(&job))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(JobError::Handler(panic_message(panic))))
            }
            None => Err(JobError::NoHandler {
                job_type: job.job_type().to_string(),
            }),
        };
        let elapsed = handler.as_ref().map(|_| started.elapsed());

        match result {
            Ok(()) => {
                job.complete();
                info!(job_id = job.id(), job_type = %job.job_type(), "Job completed");
                metrics::job_finished(job.job_type(), JobStatus::Completed, elapsed);
            }
            Err(e) => {
                warn!(job_id = job.id(), job_type = %job.job_type(), error = %e, "Job failed");
                job.fail(e);
                metrics::job_finished(job.job_type(), JobStatus::Failed, elapsed);
            }
        }

        self.persist(&job).await;
    }

    async fn cancel(&self, job: &Job) {
        if job.fail(JobError::Cancelled) {
            metrics::job_finished(job.job_type(), JobStatus::Failed, None);
            self.persist(job).await;
        }
    }

    /// Status changes are written best-effort; the worker never stops on a
    /// store failure.
    async fn persist(&self, job: &Job) {
        if !self.persists() {
            return;
        }
        if let Err(e) = self.write_record(&job.record()).await {
            error!(job_id = job.id(), error = %e, "Failed to persist job record");
        }
    }

    async fn write_record(&self, record: &JobRecord) -> Result<(), MessagingError> {
        let Some(store) = self.inner.store.as_ref() else {
            return Ok(());
        };
        let key = self.inner.config.job_key(record.id);
        let value = serde_json::to_string(record)?;
        store
            .monitor()
            .guard(
                "SET",
                self.inner.config.operation_timeout,
                store.set(&key, &value),
            )
            .await
    }

    fn persists(&self) -> bool {
        self.inner.store.is_some() && self.inner.config.persist_jobs
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the running flag when the worker loop exits, however it exits.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to a worker started with [`JobQueue::start`].
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), MessagingError>>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the worker to stop and wait for it.
    pub async fn shutdown(self) -> Result<(), MessagingError> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| MessagingError::Worker(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FailingHandler, NoOpHandler};
    use crate::job::JobOutcome;
    use crate::store::{MemoryStore, MockKeyValueStore};
    use crate::status::ConnectionMonitor;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn wait(job: &Job) -> JobOutcome {
        tokio::time::timeout(Duration::from_secs(5), job.wait())
            .await
            .expect("job did not finish in time")
    }

    #[tokio::test]
    async fn test_enqueue_returns_pending_job_with_increasing_ids() {
        let queue = JobQueue::new();
        let first = queue.enqueue("t", Payload::new()).await.unwrap();
        let second = queue.enqueue("t", Payload::new()).await.unwrap();

        assert_eq!(first.status(), JobStatus::Pending);
        assert!(second.id() > first.id());
        assert_eq!(queue.pending_len(), 2);
    }

    #[tokio::test]
    async fn test_push_notification_scenario() {
        let queue = JobQueue::new();
        queue.register_handler(NoOpHandler::new("push_notification_code"));
        let worker = queue.start();

        let job = queue
            .enqueue(
                "push_notification_code",
                payload(json!({
                    "phoneNumber": "+2775412522",
                    "message": "Thank you for contacting us."
                })),
            )
            .await
            .unwrap();

        let completions = Arc::new(AtomicUsize::new(0));
        let c = completions.clone();
        job.on_complete(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(wait(&job).await, JobOutcome::Completed);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        let statuses: Vec<_> = job.history().into_iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Pending, JobStatus::Active, JobStatus::Completed]
        );

        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_jobs_processed_in_enqueue_order() {
        let queue = JobQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = order.clone();
        queue.register_fn("t", move |job| {
            let o = o.clone();
            async move {
                tokio::task::yield_now().await;
                o.lock().unwrap().push(job.payload()["n"].as_u64().unwrap_or(0));
                Ok(())
            }
        });

        let mut jobs = Vec::new();
        for n in 0..20 {
            jobs.push(queue.enqueue("t", payload(json!({ "n": n }))).await.unwrap());
        }

        let worker = queue.start();
        for job in &jobs {
            wait(job).await;
        }
        worker.shutdown().await.unwrap();

        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<u64>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_each_job_processed_once() {
        let queue = JobQueue::new();
        let processed = Arc::new(Mutex::new(Vec::new()));
        let p = processed.clone();
        queue.register_fn("t", move |job| {
            let p = p.clone();
            async move {
                let producer = job.payload()["producer"].as_u64().unwrap_or(u64::MAX);
                let n = job.payload()["n"].as_u64().unwrap_or(u64::MAX);
                p.lock().unwrap().push((job.id(), producer, n));
                Ok(())
            }
        });
        let worker = queue.start();

        let producers: Vec<_> = (0..8u64)
            .map(|producer| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut jobs = Vec::new();
                    for n in 0..25u64 {
                        let job = queue
                            .enqueue("t", payload(json!({ "producer": producer, "n": n })))
                            .await
                            .unwrap();
                        jobs.push(job);
                    }
                    jobs
                })
            })
            .collect();

        let mut jobs = Vec::new();
        for producer in producers {
            jobs.extend(producer.await.unwrap());
        }
        for job in &jobs {
            assert_eq!(wait(job).await, JobOutcome::Completed);
        }
        worker.shutdown().await.unwrap();

        let processed = processed.lock().unwrap().clone();
        assert_eq!(processed.len(), 8 * 25);

        let mut ids: Vec<u64> = processed.iter().map(|(id, _, _)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8 * 25);

        // each producer's jobs ran in the order it enqueued them
        for producer in 0..8u64 {
            let order: Vec<u64> = processed
                .iter()
                .filter(|(_, p, _)| *p == producer)
                .map(|(_, _, n)| *n)
                .collect();
            assert_eq!(order, (0..25).collect::<Vec<u64>>());
        }
    }

    #[tokio::test]
    async fn test_one_job_at_a_time() {
        let queue = JobQueue::new();
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));
        let (a, o) = (active.clone(), overlap.clone());
        queue.register_fn("t", move |_| {
            let (a, o) = (a.clone(), o.clone());
            async move {
                if a.fetch_add(1, Ordering::SeqCst) > 0 {
                    o.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let worker = queue.start();
        let mut jobs = Vec::new();
        for _ in 0..5 {
            jobs.push(queue.enqueue("t", Payload::new()).await.unwrap());
        }
        for job in &jobs {
            wait(job).await;
        }
        worker.shutdown().await.unwrap();

        assert!(!overlap.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_handler_fails_with_no_handler() {
        let queue = JobQueue::new();
        let worker = queue.start();

        let job = queue.enqueue("unknown", Payload::new()).await.unwrap();
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let r = reasons.clone();
        job.on_failed(move |_, err| r.lock().unwrap().push(err.clone()));

        let expected = JobError::NoHandler {
            job_type: "unknown".to_string(),
        };
        assert_eq!(wait(&job).await, JobOutcome::Failed(expected.clone()));
        assert_eq!(*reasons.lock().unwrap(), vec![expected]);

        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_do_not_stop_the_worker() {
        let queue = JobQueue::new();
        queue.register_handler(FailingHandler::new("bad", "sms gateway down"));
        queue.register_fn("panics", |_| async {
            let buggy = true;
            if buggy {
                panic!("handler bug");
            }
            Ok(())
        });
        queue.register_handler(NoOpHandler::new("good"));
        let worker = queue.start();

        let bad = queue.enqueue("bad", Payload::new()).await.unwrap();
        let panics = queue.enqueue("panics", Payload::new()).await.unwrap();
        let good = queue.enqueue("good", Payload::new()).await.unwrap();

        assert_eq!(
            wait(&bad).await,
            JobOutcome::Failed(JobError::Handler("sms gateway down".into()))
        );
        match wait(&panics).await {
            JobOutcome::Failed(JobError::Handler(reason)) => assert!(reason.contains("handler bug")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(wait(&good).await.is_completed());

        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_observer_does_not_stop_the_worker() {
        let queue = JobQueue::new();
        queue.register_handler(NoOpHandler::new("t"));
        let worker = queue.start();

        let first = queue.enqueue("t", Payload::new()).await.unwrap();
        first.on_complete(|_| panic!("observer bug"));
        let second = queue.enqueue("t", Payload::new()).await.unwrap();

        assert_eq!(wait(&first).await, JobOutcome::Completed);
        assert_eq!(wait(&second).await, JobOutcome::Completed);
        assert!(!worker.is_finished());

        worker.shutdown().await.unwrap();
        assert!(!queue.inner.running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_worker_can_run_again_after_stopping() {
        let queue = JobQueue::new();
        let (tx, rx) = watch::channel(true);
        queue.run(rx).await.unwrap();

        // the flag is released, so a later run is not rejected as a second worker
        let rx = tx.subscribe();
        assert!(queue.run(rx).await.is_ok());
    }

    #[tokio::test]
    async fn test_register_handler_overwrites() {
        let queue = JobQueue::new();
        queue.register_handler(FailingHandler::new("t", "old"));
        queue.register_handler(NoOpHandler::new("t"));
        assert!(queue.has_handler("t"));

        let worker = queue.start();
        let job = queue.enqueue("t", Payload::new()).await.unwrap();
        assert!(wait(&job).await.is_completed());
        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_complete_observer_registered_late_fires_once() {
        let queue = JobQueue::new();
        queue.register_handler(NoOpHandler::new("t"));
        let worker = queue.start();

        let job = queue.enqueue("t", Payload::new()).await.unwrap();
        wait(&job).await;

        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        job.on_complete(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let h = hits.clone();
        job.on_failed(move |_, _| {
            h.fetch_add(100, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_cancels_pending_and_rejects_new_jobs() {
        let queue = JobQueue::new();
        let first = queue.enqueue("t", Payload::new()).await.unwrap();
        let second = queue.enqueue("t", Payload::new()).await.unwrap();

        queue.close().await;

        assert_eq!(first.error(), Some(JobError::Cancelled));
        assert_eq!(second.status(), JobStatus::Failed);
        assert_eq!(queue.pending_len(), 0);
        assert!(matches!(
            queue.enqueue("t", Payload::new()).await,
            Err(MessagingError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_worker_shutdown_cancels_remaining_jobs() {
        let queue = JobQueue::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        queue.register_fn("slow", move |_| {
            let release_rx = release_rx.clone();
            async move {
                if let Some(rx) = release_rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(())
            }
        });

        let worker = queue.start();
        let running = queue.enqueue("slow", Payload::new()).await.unwrap();
        let waiting = queue.enqueue("slow", Payload::new()).await.unwrap();

        // wait until the first job is picked up
        while running.status() == JobStatus::Pending {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let stopping = tokio::spawn(worker.shutdown());
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _ = release_tx.send(());
        stopping.await.unwrap().unwrap();

        assert!(wait(&running).await.is_completed());
        assert_eq!(wait(&waiting).await, JobOutcome::Failed(JobError::Cancelled));
    }

    #[tokio::test]
    async fn test_second_worker_is_rejected() {
        let queue = JobQueue::new();
        let worker = queue.start();
        tokio::task::yield_now().await;
        while !queue.inner.running.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        let (_tx, rx) = watch::channel(false);
        assert!(matches!(queue.run(rx).await, Err(MessagingError::Config(_))));
        worker.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_records_are_persisted_through_transitions() {
        let store = Arc::new(MemoryStore::new());
        let queue = JobQueue::with_store(store.clone(), QueueConfig::new("alx"));
        queue.register_handler(NoOpHandler::new("push_notification_code"));

        let job = queue
            .enqueue(
                "push_notification_code",
                payload(json!({ "phoneNumber": "+2775412522" })),
            )
            .await
            .unwrap();

        let record = queue.load_record(job.id()).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert!(store.get(&format!("alx:job:{}", job.id())).await.unwrap().is_some());

        let worker = queue.start();
        wait(&job).await;
        worker.shutdown().await.unwrap();

        let record = queue.load_record(job.id()).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.payload["phoneNumber"], "+2775412522");
        assert!(queue.load_record(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persistence_can_be_disabled() {
        let store = Arc::new(MemoryStore::new());
        let queue = JobQueue::with_store(
            store.clone(),
            QueueConfig::default().with_persist_jobs(false),
        );
        queue.enqueue("t", Payload::new()).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_load_record_requires_store() {
        let queue = JobQueue::new();
        assert!(matches!(
            queue.load_record(1).await,
            Err(MessagingError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_store_outage_fails_enqueue_fast() {
        let monitor = ConnectionMonitor::local("mock store");
        let mut store = MockKeyValueStore::new();
        let m = monitor.clone();
        store.expect_monitor().returning(move || m.clone());
        store
            .expect_set()
            .returning(|_, _| Err(MessagingError::connectivity("connection refused")));

        let queue = JobQueue::with_store(Arc::new(store), QueueConfig::default());
        let err = queue.enqueue("t", Payload::new()).await.unwrap_err();

        assert!(err.is_connectivity());
        assert_eq!(queue.pending_len(), 0);
        assert!(matches!(
            monitor.status(),
            crate::status::ConnectionStatus::Disconnected { .. }
        ));
    }

    #[tokio::test]
    async fn test_store_failure_after_enqueue_does_not_stop_worker() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_monitor()
            .returning(|| ConnectionMonitor::local("mock store"));
        let writes = Arc::new(AtomicUsize::new(0));
        let w = writes.clone();
        // first write (enqueue) succeeds, transition writes fail
        store.expect_set().returning(move |_, _| {
            if w.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err(MessagingError::Store("READONLY".into()))
            }
        });

        let queue = JobQueue::with_store(Arc::new(store), QueueConfig::default());
        queue.register_handler(NoOpHandler::new("t"));
        let worker = queue.start();

        let job = queue.enqueue("t", Payload::new()).await.unwrap();
        assert!(wait(&job).await.is_completed());
        worker.shutdown().await.unwrap();
        assert!(writes.load(Ordering::SeqCst) >= 3);
    }
}
