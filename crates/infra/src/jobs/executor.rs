//! Worker pool: claims waiting jobs and runs them through their handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use taskforge_core::JobId;

use super::handlers::{HandlerError, HandlerRegistry};
use super::queue::JobQueue;
use super::store::JobStoreError;
use super::types::{Job, Transition};

/// Default number of concurrent workers.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks
    pub concurrency: usize,
    /// How long an idle worker waits before polling again without a wake-up
    pub poll_interval: Duration,
    /// Upper bound on a single handler run; `None` lets handlers run forever
    pub handler_timeout: Option<Duration>,
    /// Name for logging
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval: Duration::from_millis(250),
            handler_timeout: None,
            name: "task-queue".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = Some(timeout);
        self
    }
}

/// Worker pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub current_running: usize,
}

#[derive(Debug, Default)]
struct ExecutorCounters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    running: AtomicUsize,
}

impl ExecutorCounters {
    fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            jobs_processed: self.processed.load(Ordering::Relaxed),
            jobs_succeeded: self.succeeded.load(Ordering::Relaxed),
            jobs_retried: self.retried.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
            current_running: self.running.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the running gauge when a job run ends, however it ends.
struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::Relaxed);
        Self(gauge)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// What happened to a job after one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Back in `delayed` until `ready_at`
    Retrying { ready_at: DateTime<Utc> },
    Failed,
}

/// Fixed-size pool of async workers sharing one queue.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    queue: JobQueue,
    handlers: HandlerRegistry,
    config: Arc<WorkerPoolConfig>,
    counters: Arc<ExecutorCounters>,
}

impl WorkerPool {
    pub fn new(queue: JobQueue, handlers: HandlerRegistry, config: WorkerPoolConfig) -> Self {
        Self {
            queue,
            handlers,
            config: Arc::new(config),
            counters: Arc::new(ExecutorCounters::default()),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn stats(&self) -> ExecutorStats {
        self.counters.snapshot()
    }

    /// Claim the next waiting job and run one attempt of it.
    ///
    /// Returns `None` when nothing is waiting.
    pub async fn process_next(&self) -> Result<Option<(JobId, JobOutcome)>, JobStoreError> {
        let now = self.queue.clock().now();
        let Some(job) = self.queue.store().claim_next(now)? else {
            return Ok(None);
        };

        let _running = RunningGuard::enter(&self.counters.running);
        debug!(
            pool = %self.config.name,
            job_id = %job.id,
            task_id = %job.task_id,
            kind = %job.kind,
            attempt = job.attempts_made,
            "claimed job"
        );

        let result = self.run_handler(&job).await;
        let outcome = self.settle(&job, result)?;
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
        Ok(Some((job.id, outcome)))
    }

    async fn run_handler(&self, job: &Job) -> Result<Value, HandlerError> {
        // The task is read fresh on every attempt; a deleted task fails the attempt.
        let task = self.queue.tasks().get(job.task_id)?;
        let handler = self.handlers.for_kind(job.kind);
        let payload = job.payload.clone();

        // Runs on its own task so a panic ends the attempt, not the worker.
        let mut run = tokio::spawn(async move { handler.execute(&task, &payload).await });

        let joined = match self.config.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut run).await {
                Ok(joined) => joined,
                Err(_) => {
                    run.abort();
                    return Err(HandlerError::TimedOut(limit));
                }
            },
            None => run.await,
        };

        joined.map_err(HandlerError::from)?
    }

    fn settle(
        &self,
        job: &Job,
        result: Result<Value, HandlerError>,
    ) -> Result<JobOutcome, JobStoreError> {
        let store = self.queue.store();
        let now = self.queue.clock().now();

        let error = match result {
            Ok(value) => {
                store.transition(job.id, Transition::Complete { result: value, at: now })?;
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                info!(
                    pool = %self.config.name,
                    job_id = %job.id,
                    task_id = %job.task_id,
                    kind = %job.kind,
                    attempt = job.attempts_made,
                    "job completed"
                );
                return Ok(JobOutcome::Completed);
            }
            Err(e) => e.to_string(),
        };

        if job.has_attempts_left() {
            let delay = self
                .queue
                .retry_policy()
                .backoff
                .delay_with_seed(job.attempts_made, jitter_seed(job.id));
            let ready_at = TimeDelta::from_std(delay)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);

            store.transition(
                job.id,
                Transition::Retry {
                    error: error.clone(),
                    ready_at,
                },
            )?;
            self.queue.signals().delays.notify_one();
            self.counters.retried.fetch_add(1, Ordering::Relaxed);
            warn!(
                pool = %self.config.name,
                job_id = %job.id,
                task_id = %job.task_id,
                kind = %job.kind,
                attempt = job.attempts_made,
                max_attempts = job.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "job failed, retrying"
            );
            Ok(JobOutcome::Retrying { ready_at })
        } else {
            store.transition(
                job.id,
                Transition::Fail {
                    error: error.clone(),
                    at: now,
                },
            )?;
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                pool = %self.config.name,
                job_id = %job.id,
                task_id = %job.task_id,
                kind = %job.kind,
                attempt = job.attempts_made,
                error = %error,
                "job failed permanently"
            );
            Ok(JobOutcome::Failed)
        }
    }

    /// Spawn `concurrency` worker tasks that run until `shutdown` flips to true.
    ///
    /// A worker finishes the job it holds before it stops.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.config.concurrency)
            .map(|worker| tokio::spawn(self.clone().worker_loop(worker, shutdown.clone())))
            .collect()
    }

    async fn worker_loop(self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        info!(pool = %self.config.name, worker, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.process_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(pool = %self.config.name, worker, error = %e, "failed to process job"),
            }

            tokio::select! {
                _ = self.queue.signals().work.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(pool = %self.config.name, worker, "worker stopped");
    }
}

fn jitter_seed(id: JobId) -> u64 {
    let bits = id.as_uuid().as_u128();
    (bits as u64) ^ ((bits >> 64) as u64)
}
