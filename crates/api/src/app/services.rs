use std::sync::Arc;
use std::time::Instant;

use taskforge_core::{Clock, DomainResult, SystemClock, TaskId};
use taskforge_infra::jobs::{HandlerRegistry, InMemoryJobStore, JobEngine, JobQueue};
use taskforge_infra::tasks::InMemoryTaskRepository;
use taskforge_tasks::{NewTask, Task, TaskPage, TaskPatch, TaskQuery, TaskRepository};

use crate::config::AppConfig;

/// Shared state handed to every route through an `Extension` layer.
pub struct AppServices {
    tasks: Arc<dyn TaskRepository>,
    queue: JobQueue,
    clock: Arc<dyn Clock>,
    environment: String,
    started_at: Instant,
}

/// Wire the in-memory stores, the queue and an engine that is ready to spawn.
pub fn build_services(config: &AppConfig) -> (Arc<AppServices>, JobEngine) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tasks: Arc<dyn TaskRepository> = Arc::new(InMemoryTaskRepository::new());
    let store = Arc::new(InMemoryJobStore::with_retention(config.retention()));

    let queue = JobQueue::new(store, tasks.clone(), clock.clone(), config.retry_policy());
    let engine = JobEngine::new(
        queue.clone(),
        HandlerRegistry::with_durations(config.reminder_duration, config.report_duration),
        config.worker_pool(),
    );

    let services = AppServices {
        tasks,
        queue,
        clock,
        environment: config.environment.clone(),
        started_at: Instant::now(),
    };
    (Arc::new(services), engine)
}

impl AppServices {
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Seconds since the services were built.
    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn create_task(&self, draft: NewTask) -> DomainResult<Task> {
        let task = Task::create(TaskId::new(), draft, self.clock.now())?;
        let task = self.tasks.create(task)?;
        tracing::info!(task_id = %task.id, "task created");
        Ok(task)
    }

    pub fn get_task(&self, id: TaskId) -> DomainResult<Task> {
        self.tasks.get(id)
    }

    pub fn list_tasks(&self, query: &TaskQuery) -> DomainResult<TaskPage> {
        self.tasks.list(query)
    }

    pub fn update_task(&self, id: TaskId, patch: TaskPatch) -> DomainResult<Task> {
        let mut task = self.tasks.get(id)?;
        task.apply_patch(patch, self.clock.now())?;
        let task = self.tasks.update(task)?;
        tracing::info!(task_id = %task.id, "task updated");
        Ok(task)
    }

    pub fn delete_task(&self, id: TaskId) -> DomainResult<()> {
        self.tasks.delete(id)?;
        tracing::info!(task_id = %id, "task deleted");
        Ok(())
    }
}
