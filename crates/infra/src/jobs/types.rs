//! Core job types and the per-job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskforge_core::{DomainError, Entity, JobId, TaskId};

/// Opaque handler input, passed through verbatim.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Job kind, used to route a job to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Reminder,
    Report,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Reminder => "reminder",
            JobKind::Report => "report",
        }
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reminder" => Ok(JobKind::Reminder),
            "report" => Ok(JobKind::Report),
            _ => Err(DomainError::validation("job_type must be reminder or report")),
        }
    }
}

/// Job state. Each state is also a bucket of the job store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready, waiting to be claimed by a worker
    Waiting,
    /// Not ready until `ready_at` (initial delay or retry backoff)
    Delayed,
    /// Claimed by exactly one worker
    Active,
    /// Handler succeeded
    Completed,
    /// Exhausted its attempts
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Delayed,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| {
                DomainError::validation(
                    "state must be one of: waiting, delayed, active, completed, failed",
                )
            })
    }
}

/// A state change requested of the job store.
///
/// Every variant is valid from exactly one source state; the store rejects
/// a transition whose source does not match the job's current state.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// `delayed -> waiting` once `ready_at` has passed
    Promote,
    /// `waiting -> active`, starting a new attempt
    Claim { at: DateTime<Utc> },
    /// `active -> completed`
    Complete {
        result: serde_json::Value,
        at: DateTime<Utc>,
    },
    /// `active -> delayed` for another attempt at `ready_at`
    Retry {
        error: String,
        ready_at: DateTime<Utc>,
    },
    /// `active -> failed`, terminal
    Fail { error: String, at: DateTime<Utc> },
}

impl Transition {
    pub fn from_state(&self) -> JobState {
        match self {
            Transition::Promote => JobState::Delayed,
            Transition::Claim { .. } => JobState::Waiting,
            Transition::Complete { .. } | Transition::Retry { .. } | Transition::Fail { .. } => {
                JobState::Active
            }
        }
    }

    pub fn to_state(&self) -> JobState {
        match self {
            Transition::Promote => JobState::Waiting,
            Transition::Claim { .. } => JobState::Active,
            Transition::Complete { .. } => JobState::Completed,
            Transition::Retry { .. } => JobState::Delayed,
            Transition::Fail { .. } => JobState::Failed,
        }
    }
}

/// A unit of deferred work tied to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub task_id: TaskId,
    pub payload: Payload,
    pub state: JobState,
    /// Eligible for dispatch at or after this instant
    pub ready_at: DateTime<Utc>,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    /// Percent complete, set on success
    pub progress: Option<u8>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Entity for Job {
    type Id = JobId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Job {
    /// Create a job, placed in `delayed` when `ready_at` is after `now` and in
    /// `waiting` otherwise.
    pub fn new(
        task_id: TaskId,
        kind: JobKind,
        payload: Payload,
        ready_at: DateTime<Utc>,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Self {
        let (state, ready_at) = if ready_at > now {
            (JobState::Delayed, ready_at)
        } else {
            (JobState::Waiting, now)
        };

        Self {
            id: JobId::new(),
            kind,
            task_id,
            payload,
            state,
            ready_at,
            attempts_made: 0,
            max_attempts,
            last_error: None,
            progress: None,
            result: None,
            created_at: now,
            processed_at: None,
            finished_at: None,
        }
    }

    /// Display name, `<kind>-<task id>`.
    pub fn name(&self) -> String {
        format!("{}-{}", self.kind, self.task_id)
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    /// Apply `transition` to this job's fields.
    ///
    /// Callers (the store) check the source state first; this only writes
    /// the fields each transition owns.
    pub fn apply(&mut self, transition: Transition) {
        self.state = transition.to_state();
        match transition {
            Transition::Promote => {}
            Transition::Claim { at } => {
                self.attempts_made += 1;
                self.processed_at = Some(at);
            }
            Transition::Complete { result, at } => {
                self.result = Some(result);
                self.progress = Some(100);
                self.finished_at = Some(at);
            }
            Transition::Retry { error, ready_at } => {
                self.last_error = Some(error);
                self.ready_at = ready_at;
            }
            Transition::Fail { error, at } => {
                self.last_error = Some(error);
                self.finished_at = Some(at);
            }
        }
    }

    /// Project the caller-facing status view.
    pub fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id,
            name: self.name(),
            kind: self.kind,
            task_id: self.task_id,
            payload: self.payload.clone(),
            state: self.state,
            progress: self.progress,
            result: self.result.clone(),
            ready_at: self.ready_at,
            created_at: self.created_at,
            processed_on: self.processed_at,
            finished_on: self.finished_at,
            last_error: self.last_error.clone(),
            attempts_made: self.attempts_made,
            max_attempts: self.max_attempts,
        }
    }
}

/// Read-only status view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: JobId,
    pub name: String,
    pub kind: JobKind,
    pub task_id: TaskId,
    pub payload: Payload,
    pub state: JobState,
    pub progress: Option<u8>,
    pub result: Option<serde_json::Value>,
    pub ready_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub processed_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub attempts_made: u32,
    pub max_attempts: u32,
}

/// When a job should first become eligible.
///
/// At most one of `at` and `delay_ms` may be set; neither means "now".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
    pub at: Option<DateTime<Utc>>,
    pub delay_ms: Option<i64>,
}

impl ScheduleOptions {
    pub fn immediate() -> Self {
        Self::default()
    }

    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            at: Some(at),
            delay_ms: None,
        }
    }

    pub fn delay_ms(delay_ms: i64) -> Self {
        Self {
            at: None,
            delay_ms: Some(delay_ms),
        }
    }
}

/// Receipt returned to the caller of a successful schedule request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub kind: JobKind,
    pub state: JobState,
    pub ready_at: DateTime<Utc>,
}

impl From<&Job> for ScheduledJob {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            task_id: job.task_id,
            kind: job.kind,
            state: job.state,
            ready_at: job.ready_at,
        }
    }
}

/// Point-in-time bucket counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

impl JobStats {
    pub fn total(&self) -> usize {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }
}
