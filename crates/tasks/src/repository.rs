//! Storage port for task records.

use std::sync::Arc;

use taskforge_core::{DomainResult, TaskId};

use crate::query::{TaskPage, TaskQuery};
use crate::task::Task;

/// Task storage abstraction.
///
/// The job engine only ever calls [`TaskRepository::exists`] and
/// [`TaskRepository::get`]; the remaining operations back the CRUD surface.
pub trait TaskRepository: Send + Sync {
    /// Insert a new task.
    fn create(&self, task: Task) -> DomainResult<Task>;

    /// Fetch a task. Unknown ids yield `DomainError::NotFound`.
    fn get(&self, id: TaskId) -> DomainResult<Task>;

    /// List tasks matching `query`.
    fn list(&self, query: &TaskQuery) -> DomainResult<TaskPage>;

    /// Replace an existing task.
    fn update(&self, task: Task) -> DomainResult<Task>;

    /// Delete a task. Unknown ids yield `DomainError::NotFound`.
    fn delete(&self, id: TaskId) -> DomainResult<()>;

    /// Whether a task with `id` exists.
    fn exists(&self, id: TaskId) -> DomainResult<bool> {
        match self.get(id) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl<R> TaskRepository for Arc<R>
where
    R: TaskRepository + ?Sized,
{
    fn create(&self, task: Task) -> DomainResult<Task> {
        (**self).create(task)
    }

    fn get(&self, id: TaskId) -> DomainResult<Task> {
        (**self).get(id)
    }

    fn list(&self, query: &TaskQuery) -> DomainResult<TaskPage> {
        (**self).list(query)
    }

    fn update(&self, task: Task) -> DomainResult<Task> {
        (**self).update(task)
    }

    fn delete(&self, id: TaskId) -> DomainResult<()> {
        (**self).delete(id)
    }

    fn exists(&self, id: TaskId) -> DomainResult<bool> {
        (**self).exists(id)
    }
}
