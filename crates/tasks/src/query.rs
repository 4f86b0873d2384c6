//! Listing queries: pagination, ordering and status filtering.

use core::cmp::Ordering;

use serde::{Deserialize, Serialize};

use taskforge_core::{DomainError, DomainResult};

use crate::task::{Task, TaskStatus};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Field used to order a task listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Title,
    DueDate,
    Status,
}

impl SortField {
    fn compare(&self, a: &Task, b: &Task) -> Ordering {
        match self {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortField::Title => a.title.cmp(&b.title),
            // Tasks without a due date sort after every dated task.
            SortField::DueDate => match (a.due_date, b.due_date) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            SortField::Status => a.status.cmp(&b.status),
        }
    }
}

impl core::str::FromStr for SortField {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" => Ok(SortField::CreatedAt),
            "updated_at" => Ok(SortField::UpdatedAt),
            "title" => Ok(SortField::Title),
            "due_date" => Ok(SortField::DueDate),
            "status" => Ok(SortField::Status),
            other => Err(DomainError::validation(format!("cannot sort by '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl core::str::FromStr for SortOrder {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(DomainError::validation("sortOrder must be asc or desc")),
        }
    }
}

/// A validated listing query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQuery {
    page: u32,
    limit: u32,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub status: Option<TaskStatus>,
}

impl Default for TaskQuery {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
            status: None,
        }
    }
}

impl TaskQuery {
    /// Build a query, rejecting `page < 1` and `limit` outside `1..=100`.
    pub fn new(page: u32, limit: u32) -> DomainResult<Self> {
        if page < 1 {
            return Err(DomainError::validation("page must be greater than 0"));
        }
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(DomainError::validation(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        Ok(Self {
            page,
            limit,
            ..Default::default()
        })
    }

    pub fn sorted(mut self, sort_by: SortField, sort_order: SortOrder) -> Self {
        self.sort_by = sort_by;
        self.sort_order = sort_order;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Filter, order and slice `tasks` according to this query.
    ///
    /// Storage backends without native querying can hand their full record
    /// set to this function.
    pub fn apply(&self, tasks: impl IntoIterator<Item = Task>) -> TaskPage {
        let mut matching: Vec<Task> = tasks
            .into_iter()
            .filter(|t| self.status.is_none_or(|s| t.status == s))
            .collect();

        matching.sort_by(|a, b| {
            let ord = self.sort_by.compare(a, b).then_with(|| a.id.cmp(&b.id));
            match self.sort_order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let total = matching.len() as u64;
        let skip = (self.page as usize - 1) * self.limit as usize;
        let tasks = matching
            .into_iter()
            .skip(skip)
            .take(self.limit as usize)
            .collect();

        TaskPage {
            tasks,
            pagination: Pagination {
                page: self.page,
                limit: self.limit,
                total,
                pages: total.div_ceil(self.limit as u64),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

/// One page of a task listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub pagination: Pagination,
}
