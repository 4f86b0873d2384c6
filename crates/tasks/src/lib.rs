//! Tasks domain module.
//!
//! This crate contains the task record and its business rules (validation,
//! patching, listing order), implemented purely as deterministic domain logic
//! (no IO, no HTTP, no storage). Storage lives behind [`TaskRepository`].

pub mod query;
pub mod repository;
pub mod task;

pub use query::{Pagination, SortField, SortOrder, TaskPage, TaskQuery};
pub use repository::TaskRepository;
pub use task::{NewTask, Task, TaskPatch, TaskStatus};
