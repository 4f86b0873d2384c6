//! Caller-facing queue: scheduling, status lookup, stats and removal.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Notify;
use tracing::info;

use taskforge_core::{Clock, DomainError, JobId, TaskId};
use taskforge_tasks::TaskRepository;

use super::backoff::RetryPolicy;
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobKind, JobState, JobStats, JobStatus, Payload, ScheduleOptions, ScheduledJob};

/// Queue-level error.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("job not found: {0}")]
    JobNotFound(JobId),
    #[error("{0}")]
    InvalidSchedule(String),
    #[error(transparent)]
    Task(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Wake-ups shared by the queue, the dispatcher and the workers.
#[derive(Debug, Default)]
pub(crate) struct Signals {
    /// A job entered `waiting`
    pub(crate) work: Notify,
    /// A job entered `delayed`, possibly earlier than anything indexed
    pub(crate) delays: Notify,
}

/// Handle to the job queue.
///
/// Cheap to clone; all clones share the same store and wake-up signals.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    tasks: Arc<dyn TaskRepository>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    signals: Arc<Signals>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        tasks: Arc<dyn TaskRepository>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            tasks,
            clock,
            retry,
            signals: Arc::new(Signals::default()),
        }
    }

    /// Schedule a job of `kind` against an existing task.
    ///
    /// Nothing is stored unless the task exists and `options` resolve to a
    /// valid ready time.
    pub fn schedule(
        &self,
        task_id: TaskId,
        kind: JobKind,
        options: ScheduleOptions,
        payload: Payload,
    ) -> Result<ScheduledJob, QueueError> {
        if !self.tasks.exists(task_id)? {
            return Err(QueueError::TaskNotFound(task_id));
        }

        let now = self.clock.now();
        let ready_at = resolve_ready_at(options, now)?;
        let job = Job::new(task_id, kind, payload, ready_at, now, self.retry.max_attempts);
        let job = self.store.insert(job)?;

        match job.state {
            JobState::Waiting => self.signals.work.notify_one(),
            _ => self.signals.delays.notify_one(),
        }

        info!(
            job_id = %job.id,
            task_id = %job.task_id,
            kind = %job.kind,
            state = %job.state,
            ready_at = %job.ready_at,
            "job scheduled"
        );
        Ok(ScheduledJob::from(&job))
    }

    pub fn status(&self, job_id: JobId) -> Result<JobStatus, QueueError> {
        self.store
            .get(job_id)?
            .map(|job| job.status())
            .ok_or(QueueError::JobNotFound(job_id))
    }

    pub fn stats(&self) -> Result<JobStats, QueueError> {
        Ok(self.store.count_by_bucket()?)
    }

    /// Remove a job that has not started yet.
    pub fn remove(&self, job_id: JobId) -> Result<JobStatus, QueueError> {
        match self.store.remove(job_id) {
            Ok(job) => {
                info!(job_id = %job.id, task_id = %job.task_id, kind = %job.kind, "job removed");
                Ok(job.status())
            }
            Err(JobStoreError::NotFound(id)) => Err(QueueError::JobNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<JobStatus>, QueueError> {
        Ok(self
            .store
            .list(state, limit)?
            .iter()
            .map(Job::status)
            .collect())
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn tasks(&self) -> &Arc<dyn TaskRepository> {
        &self.tasks
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn signals(&self) -> &Signals {
        &self.signals
    }
}

fn resolve_ready_at(
    options: ScheduleOptions,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, QueueError> {
    match (options.at, options.delay_ms) {
        (Some(_), Some(_)) => Err(QueueError::InvalidSchedule(
            "Provide either scheduled_for or delay, not both".to_string(),
        )),
        (Some(at), None) if at <= now => Err(QueueError::InvalidSchedule(
            "Scheduled time must be in the future".to_string(),
        )),
        (Some(at), None) => Ok(at),
        (None, Some(ms)) if ms < 0 => Err(QueueError::InvalidSchedule(
            "Delay must not be negative".to_string(),
        )),
        (None, Some(ms)) => TimeDelta::try_milliseconds(ms)
            .and_then(|delay| now.checked_add_signed(delay))
            .ok_or_else(|| QueueError::InvalidSchedule("Delay is too large".to_string())),
        (None, None) => Ok(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::tasks::InMemoryTaskRepository;
    use taskforge_core::ManualClock;
    use taskforge_tasks::{NewTask, Task};

    struct Fixture {
        queue: JobQueue,
        clock: Arc<ManualClock>,
        task: Task,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let task = Task::create(
            TaskId::new(),
            NewTask {
                title: "Write report".to_string(),
                ..Default::default()
            },
            clock.now(),
        )
        .unwrap();
        tasks.create(task.clone()).unwrap();

        let queue = JobQueue::new(
            InMemoryJobStore::arc(),
            tasks,
            clock.clone(),
            RetryPolicy::default(),
        );
        Fixture { queue, clock, task }
    }

    #[test]
    fn zero_delay_lands_in_waiting() {
        let f = fixture();
        let job = f
            .queue
            .schedule(f.task.id, JobKind::Reminder, ScheduleOptions::delay_ms(0), Payload::new())
            .unwrap();

        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.ready_at, f.clock.now());
        assert_eq!(f.queue.stats().unwrap().waiting, 1);
    }

    #[test]
    fn positive_delay_lands_in_delayed() {
        let f = fixture();
        let job = f
            .queue
            .schedule(f.task.id, JobKind::Report, ScheduleOptions::delay_ms(5000), Payload::new())
            .unwrap();

        assert_eq!(job.state, JobState::Delayed);
        assert_eq!(job.ready_at, f.clock.now() + TimeDelta::milliseconds(5000));

        let status = f.queue.status(job.job_id).unwrap();
        assert_eq!(status.state, JobState::Delayed);
        assert_eq!(status.attempts_made, 0);
        assert_eq!(status.max_attempts, 3);
        assert_eq!(status.name, format!("report-{}", f.task.id));
    }

    #[test]
    fn unknown_task_creates_nothing() {
        let f = fixture();
        let err = f
            .queue
            .schedule(TaskId::new(), JobKind::Reminder, ScheduleOptions::immediate(), Payload::new())
            .unwrap_err();

        assert!(matches!(err, QueueError::TaskNotFound(_)));
        assert_eq!(f.queue.stats().unwrap().total(), 0);
    }

    #[test]
    fn past_or_present_timestamp_is_rejected() {
        let f = fixture();
        for at in [f.clock.now(), f.clock.now() - TimeDelta::seconds(1)] {
            let err = f
                .queue
                .schedule(f.task.id, JobKind::Reminder, ScheduleOptions::at(at), Payload::new())
                .unwrap_err();
            assert!(matches!(err, QueueError::InvalidSchedule(ref m) if m == "Scheduled time must be in the future"));
        }
        assert_eq!(f.queue.stats().unwrap().total(), 0);
    }

    #[test]
    fn conflicting_or_negative_options_are_rejected() {
        let f = fixture();
        let both = ScheduleOptions {
            at: Some(f.clock.now() + TimeDelta::seconds(10)),
            delay_ms: Some(10),
        };

        for options in [both, ScheduleOptions::delay_ms(-1), ScheduleOptions::delay_ms(i64::MAX)] {
            let err = f
                .queue
                .schedule(f.task.id, JobKind::Reminder, options, Payload::new())
                .unwrap_err();
            assert!(matches!(err, QueueError::InvalidSchedule(_)));
        }
        assert_eq!(f.queue.stats().unwrap().total(), 0);
    }

    #[test]
    fn future_timestamp_is_kept_verbatim() {
        let f = fixture();
        let at = f.clock.now() + TimeDelta::minutes(5);
        let job = f
            .queue
            .schedule(f.task.id, JobKind::Reminder, ScheduleOptions::at(at), Payload::new())
            .unwrap();
        assert_eq!(job.ready_at, at);
        assert_eq!(job.state, JobState::Delayed);
    }

    #[test]
    fn unknown_job_status_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.queue.status(JobId::new()),
            Err(QueueError::JobNotFound(_))
        ));
        assert!(matches!(
            f.queue.remove(JobId::new()),
            Err(QueueError::JobNotFound(_))
        ));
    }

    #[test]
    fn remove_and_list() {
        let f = fixture();
        let keep = f
            .queue
            .schedule(f.task.id, JobKind::Reminder, ScheduleOptions::immediate(), Payload::new())
            .unwrap();
        let removed = f
            .queue
            .schedule(f.task.id, JobKind::Report, ScheduleOptions::delay_ms(1000), Payload::new())
            .unwrap();

        f.queue.remove(removed.job_id).unwrap();

        let listed = f.queue.list(None, 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, keep.job_id);
        assert!(f.queue.list(Some(JobState::Delayed), 10).unwrap().is_empty());
    }
}
