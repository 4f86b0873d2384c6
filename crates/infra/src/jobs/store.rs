//! Job storage: state buckets plus the delay index.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use taskforge_core::JobId;

use super::types::{Job, JobState, JobStats, Transition};

/// Job store abstraction.
///
/// Every method is one atomic operation: concurrent callers never observe a
/// job in two buckets, in none, or half-updated.
pub trait JobStore: Send + Sync {
    /// Insert a new job into the bucket matching its state (`waiting` or
    /// `delayed`).
    fn insert(&self, job: Job) -> Result<Job, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Compare-and-move: apply `transition` only if the job is currently in
    /// the transition's source bucket.
    ///
    /// A mismatch yields [`JobStoreError::Conflict`] and changes nothing.
    fn transition(&self, job_id: JobId, transition: Transition) -> Result<Job, JobStoreError>;

    /// Claim the earliest-ready waiting job (`waiting -> active`).
    /// Returns None if nothing is waiting.
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError>;

    /// Delayed jobs whose `ready_at` is at or before `before`, in ascending
    /// `ready_at` order (ties in insertion order).
    fn scan_due(&self, before: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError>;

    /// Earliest `ready_at` in the delay index, if any.
    fn next_ready_at(&self) -> Result<Option<DateTime<Utc>>, JobStoreError>;

    /// Remove a job that is still `waiting` or `delayed`.
    fn remove(&self, job_id: JobId) -> Result<Job, JobStoreError>;

    /// List jobs, optionally restricted to one state, oldest first.
    fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Bucket sizes, read under one snapshot.
    fn count_by_bucket(&self) -> Result<JobStats, JobStoreError>;

    /// Move every due delayed job to `waiting`, in delay-index order.
    ///
    /// Safe to run from several sweepers at once: a job another sweeper
    /// already promoted is a lost race, not an error.
    fn promote_due(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError> {
        let mut promoted = Vec::new();
        for job_id in self.scan_due(now)? {
            match self.transition(job_id, Transition::Promote) {
                Ok(_) => promoted.push(job_id),
                Err(e) if e.is_lost_race() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(promoted)
    }
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {id} is {actual}, expected {expected}")]
    Conflict {
        id: JobId,
        expected: JobState,
        actual: JobState,
    },
    #[error("invalid transition for job {id}: {reason}")]
    InvalidTransition { id: JobId, reason: String },
    #[error("storage error: {0}")]
    Storage(String),
}

impl JobStoreError {
    /// Conflicts and vanished jobs both mean another caller got there first.
    pub fn is_lost_race(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::NotFound(_))
    }
}

/// How many terminal jobs the store keeps before evicting the oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_completed: 100,
            keep_failed: 50,
        }
    }
}

/// Position of a job in the waiting queue or the delay index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    ready_at: DateTime<Utc>,
    seq: u64,
    id: JobId,
}

#[derive(Debug)]
struct Slot {
    job: Job,
    seq: u64,
}

impl Slot {
    fn key(&self) -> QueueKey {
        QueueKey {
            ready_at: self.job.ready_at,
            seq: self.seq,
            id: self.job.id,
        }
    }
}

#[derive(Debug, Default)]
struct Buckets {
    jobs: HashMap<JobId, Slot>,
    waiting: BTreeSet<QueueKey>,
    delayed: BTreeSet<QueueKey>,
    active: HashSet<JobId>,
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    next_seq: u64,
}

impl Buckets {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn attach(&mut self, state: JobState, key: QueueKey) {
        match state {
            JobState::Waiting => {
                self.waiting.insert(key);
            }
            JobState::Delayed => {
                self.delayed.insert(key);
            }
            JobState::Active => {
                self.active.insert(key.id);
            }
            JobState::Completed => self.completed.push_back(key.id),
            JobState::Failed => self.failed.push_back(key.id),
        }
    }

    fn detach(&mut self, state: JobState, key: QueueKey) {
        match state {
            JobState::Waiting => {
                self.waiting.remove(&key);
            }
            JobState::Delayed => {
                self.delayed.remove(&key);
            }
            JobState::Active => {
                self.active.remove(&key.id);
            }
            JobState::Completed => self.completed.retain(|id| *id != key.id),
            JobState::Failed => self.failed.retain(|id| *id != key.id),
        }
    }

    fn apply(&mut self, job_id: JobId, transition: Transition) -> Result<Job, JobStoreError> {
        let slot = self
            .jobs
            .get(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;

        let expected = transition.from_state();
        if slot.job.state != expected {
            return Err(JobStoreError::Conflict {
                id: job_id,
                expected,
                actual: slot.job.state,
            });
        }
        if matches!(transition, Transition::Retry { .. }) && !slot.job.has_attempts_left() {
            return Err(JobStoreError::InvalidTransition {
                id: job_id,
                reason: format!("all {} attempts used", slot.job.max_attempts),
            });
        }

        let old_key = slot.key();
        let requeue = matches!(transition, Transition::Retry { .. });
        let seq = if requeue { self.next_seq() } else { old_key.seq };

        self.detach(expected, old_key);
        let slot = self
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;
        slot.job.apply(transition);
        slot.seq = seq;
        let (state, key, job) = (slot.job.state, slot.key(), slot.job.clone());
        self.attach(state, key);
        Ok(job)
    }

    fn evict_beyond(&mut self, retention: RetentionPolicy) {
        while self.completed.len() > retention.keep_completed {
            if let Some(id) = self.completed.pop_front() {
                self.jobs.remove(&id);
            }
        }
        while self.failed.len() > retention.keep_failed {
            if let Some(id) = self.failed.pop_front() {
                self.jobs.remove(&id);
            }
        }
    }
}

/// In-memory job store.
///
/// All buckets sit behind a single lock, which is what makes every
/// operation (including the stats snapshot) atomic.
#[derive(Debug)]
pub struct InMemoryJobStore {
    inner: RwLock<Buckets>,
    retention: RetentionPolicy,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_retention(RetentionPolicy::default())
    }

    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self {
            inner: RwLock::new(Buckets::default()),
            retention,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Buckets>, JobStoreError> {
        self.inner
            .read()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Buckets>, JobStoreError> {
        self.inner
            .write()
            .map_err(|_| JobStoreError::Storage("job store lock poisoned".to_string()))
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) -> Result<Job, JobStoreError> {
        if !matches!(job.state, JobState::Waiting | JobState::Delayed) {
            return Err(JobStoreError::InvalidTransition {
                id: job.id,
                reason: format!("new jobs cannot start {}", job.state),
            });
        }

        let mut buckets = self.write()?;
        if buckets.jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }

        let seq = buckets.next_seq();
        let slot = Slot { job, seq };
        let (state, key, job) = (slot.job.state, slot.key(), slot.job.clone());
        buckets.jobs.insert(key.id, slot);
        buckets.attach(state, key);
        Ok(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let buckets = self.read()?;
        Ok(buckets.jobs.get(&job_id).map(|slot| slot.job.clone()))
    }

    fn transition(&self, job_id: JobId, transition: Transition) -> Result<Job, JobStoreError> {
        let mut buckets = self.write()?;
        let terminal = transition.to_state().is_terminal();
        let job = buckets.apply(job_id, transition)?;
        if terminal {
            buckets.evict_beyond(self.retention);
        }
        Ok(job)
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        let mut buckets = self.write()?;
        let Some(key) = buckets.waiting.first().copied() else {
            return Ok(None);
        };
        buckets.apply(key.id, Transition::Claim { at: now }).map(Some)
    }

    fn scan_due(&self, before: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError> {
        let buckets = self.read()?;
        Ok(buckets
            .delayed
            .iter()
            .take_while(|key| key.ready_at <= before)
            .map(|key| key.id)
            .collect())
    }

    fn next_ready_at(&self) -> Result<Option<DateTime<Utc>>, JobStoreError> {
        let buckets = self.read()?;
        Ok(buckets.delayed.first().map(|key| key.ready_at))
    }

    fn remove(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut buckets = self.write()?;
        let slot = buckets
            .jobs
            .get(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;

        let state = slot.job.state;
        if !matches!(state, JobState::Waiting | JobState::Delayed) {
            return Err(JobStoreError::Conflict {
                id: job_id,
                expected: JobState::Waiting,
                actual: state,
            });
        }

        let key = slot.key();
        buckets.detach(state, key);
        buckets
            .jobs
            .remove(&job_id)
            .map(|slot| slot.job)
            .ok_or(JobStoreError::NotFound(job_id))
    }

    fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let buckets = self.read()?;
        let mut result: Vec<_> = buckets
            .jobs
            .values()
            .filter(|slot| state.is_none_or(|s| slot.job.state == s))
            .map(|slot| slot.job.clone())
            .collect();

        result.sort_by_key(|j| (j.created_at, j.id));
        result.truncate(limit);
        Ok(result)
    }

    fn count_by_bucket(&self) -> Result<JobStats, JobStoreError> {
        let buckets = self.read()?;
        Ok(JobStats {
            waiting: buckets.waiting.len(),
            active: buckets.active.len(),
            completed: buckets.completed.len(),
            failed: buckets.failed.len(),
            delayed: buckets.delayed.len(),
        })
    }
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn insert(&self, job: Job) -> Result<Job, JobStoreError> {
        (**self).insert(job)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get(job_id)
    }

    fn transition(&self, job_id: JobId, transition: Transition) -> Result<Job, JobStoreError> {
        (**self).transition(job_id, transition)
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next(now)
    }

    fn scan_due(&self, before: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError> {
        (**self).scan_due(before)
    }

    fn next_ready_at(&self) -> Result<Option<DateTime<Utc>>, JobStoreError> {
        (**self).next_ready_at()
    }

    fn remove(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        (**self).remove(job_id)
    }

    fn list(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        (**self).list(state, limit)
    }

    fn count_by_bucket(&self) -> Result<JobStats, JobStoreError> {
        (**self).count_by_bucket()
    }

    fn promote_due(&self, now: DateTime<Utc>) -> Result<Vec<JobId>, JobStoreError> {
        (**self).promote_due(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{JobKind, Payload};
    use chrono::Duration;
    use taskforge_core::TaskId;

    fn job_at(ready_at: DateTime<Utc>, now: DateTime<Utc>) -> Job {
        Job::new(TaskId::new(), JobKind::Reminder, Payload::new(), ready_at, now, 3)
    }

    #[test]
    fn insert_and_claim() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let job = store.insert(job_at(now, now)).unwrap();

        let claimed = store.claim_next(now).unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.state, JobState::Active);
        assert_eq!(claimed.attempts_made, 1);

        // No more jobs
        assert!(store.claim_next(now).unwrap().is_none());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let job = job_at(now, now);

        store.insert(job.clone()).unwrap();
        assert_eq!(
            store.insert(job.clone()),
            Err(JobStoreError::AlreadyExists(job.id))
        );
    }

    #[test]
    fn claims_in_ready_order_then_fifo() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let first = store.insert(job_at(now, now)).unwrap();
        let second = store.insert(job_at(now, now)).unwrap();

        assert_eq!(store.claim_next(now).unwrap().unwrap().id, first.id);
        assert_eq!(store.claim_next(now).unwrap().unwrap().id, second.id);
    }

    #[test]
    fn delayed_jobs_are_not_claimable_until_promoted() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let job = store
            .insert(job_at(now + Duration::seconds(5), now))
            .unwrap();

        assert_eq!(job.state, JobState::Delayed);
        assert!(store.claim_next(now).unwrap().is_none());
        assert!(store.promote_due(now + Duration::seconds(4)).unwrap().is_empty());

        let promoted = store.promote_due(now + Duration::seconds(5)).unwrap();
        assert_eq!(promoted, vec![job.id]);
        assert_eq!(store.claim_next(now).unwrap().unwrap().id, job.id);
    }

    #[test]
    fn scan_due_orders_by_ready_at_then_insertion() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        let late = store.insert(job_at(now + Duration::seconds(3), now)).unwrap();
        let tie_a = store.insert(job_at(now + Duration::seconds(1), now)).unwrap();
        let tie_b = store.insert(job_at(now + Duration::seconds(1), now)).unwrap();

        let due = store.scan_due(now + Duration::seconds(10)).unwrap();
        assert_eq!(due, vec![tie_a.id, tie_b.id, late.id]);
        assert_eq!(
            store.next_ready_at().unwrap(),
            Some(now + Duration::seconds(1))
        );
    }

    #[test]
    fn transition_from_wrong_bucket_is_a_conflict() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let job = store.insert(job_at(now, now)).unwrap();

        let err = store
            .transition(
                job.id,
                Transition::Complete {
                    result: serde_json::Value::Null,
                    at: now,
                },
            )
            .unwrap_err();

        assert_eq!(
            err,
            JobStoreError::Conflict {
                id: job.id,
                expected: JobState::Active,
                actual: JobState::Waiting,
            }
        );
        assert!(err.is_lost_race());
        assert_eq!(store.count_by_bucket().unwrap().waiting, 1);
    }

    #[test]
    fn retry_requires_attempts_left() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let mut job = job_at(now, now);
        job.max_attempts = 1;
        let job = store.insert(job).unwrap();
        store.claim_next(now).unwrap();

        let err = store
            .transition(
                job.id,
                Transition::Retry {
                    error: "boom".to_string(),
                    ready_at: now,
                },
            )
            .unwrap_err();
        assert!(matches!(err, JobStoreError::InvalidTransition { .. }));
        assert_eq!(store.get(job.id).unwrap().unwrap().state, JobState::Active);
    }

    #[test]
    fn remove_only_pending_jobs() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();
        let waiting = store.insert(job_at(now, now)).unwrap();
        let delayed = store.insert(job_at(now + Duration::seconds(1), now)).unwrap();

        store.remove(delayed.id).unwrap();
        let active = store.claim_next(now).unwrap().unwrap();
        assert_eq!(active.id, waiting.id);

        assert!(matches!(
            store.remove(active.id),
            Err(JobStoreError::Conflict { .. })
        ));
        assert_eq!(store.count_by_bucket().unwrap(), JobStats {
            active: 1,
            ..Default::default()
        });
    }

    #[test]
    fn retention_evicts_oldest_terminal_jobs() {
        let store = InMemoryJobStore::with_retention(RetentionPolicy {
            keep_completed: 2,
            keep_failed: 1,
        });
        let now = Utc::now();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let job = store.insert(job_at(now, now)).unwrap();
            store.claim_next(now).unwrap();
            store
                .transition(
                    job.id,
                    Transition::Complete {
                        result: serde_json::Value::Null,
                        at: now,
                    },
                )
                .unwrap();
            ids.push(job.id);
        }

        assert!(store.get(ids[0]).unwrap().is_none());
        assert!(store.get(ids[2]).unwrap().is_some());
        assert_eq!(store.count_by_bucket().unwrap().completed, 2);
    }

    #[test]
    fn stats_tracking() {
        let store = InMemoryJobStore::new();
        let now = Utc::now();

        for _ in 0..5 {
            store.insert(job_at(now, now)).unwrap();
        }
        store.insert(job_at(now + Duration::seconds(30), now)).unwrap();

        let stats = store.count_by_bucket().unwrap();
        assert_eq!(stats.waiting, 5);
        assert_eq!(stats.delayed, 1);

        store.claim_next(now).unwrap();
        store.claim_next(now).unwrap();

        let stats = store.count_by_bucket().unwrap();
        assert_eq!(stats.waiting, 3);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.total(), 6);
    }

    #[test]
    fn concurrent_claims_never_hand_out_a_job_twice() {
        let store = InMemoryJobStore::arc();
        let now = Utc::now();
        for _ in 0..200 {
            store.insert(job_at(now, now)).unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut claimed = Vec::new();
                    while let Some(job) = store.claim_next(now).unwrap() {
                        claimed.push(job.id);
                    }
                    claimed
                })
            })
            .collect();

        let mut all: Vec<JobId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();

        assert_eq!(total, 200);
        assert_eq!(all.len(), 200);
        assert_eq!(store.count_by_bucket().unwrap().active, 200);
    }
}
