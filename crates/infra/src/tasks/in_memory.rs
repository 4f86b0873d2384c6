//! In-memory task repository.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use taskforge_core::{DomainError, DomainResult, TaskId};
use taskforge_tasks::{Task, TaskPage, TaskQuery, TaskRepository};

/// `HashMap`-backed [`TaskRepository`].
#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> DomainResult<RwLockReadGuard<'_, HashMap<TaskId, Task>>> {
        self.tasks
            .read()
            .map_err(|_| DomainError::storage("task store lock poisoned"))
    }

    fn write(&self) -> DomainResult<RwLockWriteGuard<'_, HashMap<TaskId, Task>>> {
        self.tasks
            .write()
            .map_err(|_| DomainError::storage("task store lock poisoned"))
    }
}

impl TaskRepository for InMemoryTaskRepository {
    fn create(&self, task: Task) -> DomainResult<Task> {
        let mut tasks = self.write()?;
        if tasks.contains_key(&task.id) {
            return Err(DomainError::conflict(format!("task {} already exists", task.id)));
        }
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    fn get(&self, id: TaskId) -> DomainResult<Task> {
        self.read()?
            .get(&id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("Task"))
    }

    fn list(&self, query: &TaskQuery) -> DomainResult<TaskPage> {
        let tasks = self.read()?;
        Ok(query.apply(tasks.values().cloned()))
    }

    fn update(&self, task: Task) -> DomainResult<Task> {
        let mut tasks = self.write()?;
        match tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(task)
            }
            None => Err(DomainError::not_found("Task")),
        }
    }

    fn delete(&self, id: TaskId) -> DomainResult<()> {
        self.write()?
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DomainError::not_found("Task"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskforge_tasks::{NewTask, TaskPatch, TaskStatus};

    fn task(title: &str) -> Task {
        Task::create(
            TaskId::new(),
            NewTask {
                title: title.to_string(),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn create_get_delete() {
        let repo = InMemoryTaskRepository::new();
        let t = repo.create(task("one")).unwrap();

        assert_eq!(repo.get(t.id).unwrap(), t);
        assert!(repo.exists(t.id).unwrap());

        repo.delete(t.id).unwrap();
        assert!(repo.get(t.id).unwrap_err().is_not_found());
        assert!(!repo.exists(t.id).unwrap());
        assert!(repo.delete(t.id).unwrap_err().is_not_found());
    }

    #[test]
    fn duplicate_create_conflicts() {
        let repo = InMemoryTaskRepository::new();
        let t = repo.create(task("one")).unwrap();
        assert!(matches!(repo.create(t), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn update_replaces_record() {
        let repo = InMemoryTaskRepository::new();
        let mut t = repo.create(task("one")).unwrap();
        t.apply_patch(
            TaskPatch {
                status: Some(TaskStatus::Completed),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();

        repo.update(t.clone()).unwrap();
        assert_eq!(repo.get(t.id).unwrap().status, TaskStatus::Completed);

        assert!(repo.update(task("missing")).unwrap_err().is_not_found());
    }

    #[test]
    fn list_filters_and_paginates() {
        let repo = InMemoryTaskRepository::new();
        for i in 0..15 {
            repo.create(task(&format!("task {i}"))).unwrap();
        }

        let page = repo.list(&TaskQuery::new(2, 10).unwrap()).unwrap();
        assert_eq!(page.tasks.len(), 5);
        assert_eq!(page.pagination.total, 15);
        assert_eq!(page.pagination.pages, 2);

        let done = repo
            .list(&TaskQuery::default().with_status(TaskStatus::Completed))
            .unwrap();
        assert_eq!(done.pagination.total, 0);
    }
}
