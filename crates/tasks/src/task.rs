use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskforge_core::{DomainError, DomainResult, Entity, TaskId};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 1000;
pub const MAX_ASSIGNEE_LEN: usize = 100;

/// Task status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl core::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            _ => Err(DomainError::validation(
                "status must be pending, in_progress, or completed",
            )),
        }
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

/// Partial update of a task. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

/// A task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub assigned_to: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Task {
    type Id = TaskId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Task {
    /// Validate `draft` and build a new task record.
    pub fn create(id: TaskId, draft: NewTask, now: DateTime<Utc>) -> DomainResult<Self> {
        let title = required_text("title", &draft.title, MAX_TITLE_LEN)?;
        let description = optional_text("description", draft.description.as_deref(), MAX_DESCRIPTION_LEN)?;
        let assigned_to = optional_text("assigned_to", draft.assigned_to.as_deref(), MAX_ASSIGNEE_LEN)?;
        check_due_date(draft.due_date, now)?;

        Ok(Self {
            id,
            title,
            description,
            status: draft.status.unwrap_or_default(),
            assigned_to,
            due_date: draft.due_date,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a partial update.
    ///
    /// Every field of the patch is validated before anything is written, so a
    /// rejected patch leaves the task unchanged.
    pub fn apply_patch(&mut self, patch: TaskPatch, now: DateTime<Utc>) -> DomainResult<()> {
        let title = patch
            .title
            .as_deref()
            .map(|t| required_text("title", t, MAX_TITLE_LEN))
            .transpose()?;
        let description = patch
            .description
            .as_deref()
            .map(|d| optional_text("description", Some(d), MAX_DESCRIPTION_LEN))
            .transpose()?;
        let assigned_to = patch
            .assigned_to
            .as_deref()
            .map(|a| optional_text("assigned_to", Some(a), MAX_ASSIGNEE_LEN))
            .transpose()?;
        check_due_date(patch.due_date, now)?;

        if let Some(title) = title {
            self.title = title;
        }
        if let Some(description) = description {
            self.description = description;
        }
        if let Some(assigned_to) = assigned_to {
            self.assigned_to = assigned_to;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if patch.due_date.is_some() {
            self.due_date = patch.due_date;
        }
        self.updated_at = now;
        Ok(())
    }
}

fn required_text(field: &str, value: &str, max: usize) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    check_len(field, trimmed, max)?;
    Ok(trimmed.to_string())
}

fn optional_text(field: &str, value: Option<&str>, max: usize) -> DomainResult<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => {
            check_len(field, v, max)?;
            Ok(Some(v.to_string()))
        }
    }
}

fn check_len(field: &str, value: &str, max: usize) -> DomainResult<()> {
    if value.chars().count() > max {
        return Err(DomainError::validation(format!(
            "{field} cannot exceed {max} characters"
        )));
    }
    Ok(())
}

fn check_due_date(due_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DomainResult<()> {
    match due_date {
        Some(due) if due <= now => Err(DomainError::validation("due_date must be in the future")),
        _ => Ok(()),
    }
}
