use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use taskforge_core::DomainResult;
use taskforge_infra::jobs::{JobState, Payload, ScheduleOptions};
use taskforge_tasks::{Pagination, SortField, SortOrder, TaskQuery, TaskStatus};

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /tasks/:id/schedule`.
#[derive(Debug, Deserialize)]
pub struct ScheduleJobRequest {
    pub job_type: String,
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Milliseconds from now
    pub delay: Option<i64>,
    pub data: Option<Payload>,
}

impl ScheduleJobRequest {
    pub fn options(&self) -> ScheduleOptions {
        ScheduleOptions {
            at: self.scheduled_for,
            delay_ms: self.delay,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    #[serde(alias = "sort_by")]
    pub sort_by: Option<String>,
    #[serde(alias = "sort_order")]
    pub sort_order: Option<String>,
}

impl ListTasksParams {
    pub fn to_query(&self, status: Option<TaskStatus>) -> DomainResult<TaskQuery> {
        let defaults = TaskQuery::default();
        let mut query = TaskQuery::new(
            self.page.unwrap_or(defaults.page()),
            self.limit.unwrap_or(defaults.limit()),
        )?
        .sorted(
            self.sort_by.as_deref().map(str::parse::<SortField>).transpose()?.unwrap_or_default(),
            self.sort_order.as_deref().map(str::parse::<SortOrder>).transpose()?.unwrap_or_default(),
        );
        if let Some(status) = status {
            query = query.with_status(status);
        }
        Ok(query)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsParams {
    pub state: Option<String>,
    pub limit: Option<usize>,
}

impl ListJobsParams {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 500;

    pub fn state(&self) -> DomainResult<Option<JobState>> {
        self.state.as_deref().map(str::parse::<JobState>).transpose()
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT)
    }
}

// -------------------------
// Response envelope
// -------------------------

pub fn ok<T: Serialize>(status: StatusCode, message: &str, data: T) -> axum::response::Response {
    (
        status,
        Json(json!({
            "success": true,
            "message": message,
            "data": data,
        })),
    )
        .into_response()
}

pub fn paginated<T: Serialize>(message: &str, data: T, pagination: Pagination) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": message,
            "data": data,
            "pagination": pagination,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_params_fall_back_to_defaults() {
        let query = ListTasksParams::default().to_query(None).unwrap();
        assert_eq!(query, TaskQuery::default());
    }

    #[test]
    fn list_params_parse_sorting() {
        let params = ListTasksParams {
            page: Some(2),
            limit: Some(5),
            sort_by: Some("title".to_string()),
            sort_order: Some("asc".to_string()),
        };
        let query = params.to_query(Some(TaskStatus::Completed)).unwrap();

        assert_eq!(query.page(), 2);
        assert_eq!(query.limit(), 5);
        assert_eq!(query.sort_by, SortField::Title);
        assert_eq!(query.sort_order, SortOrder::Asc);
        assert_eq!(query.status, Some(TaskStatus::Completed));
    }

    #[test]
    fn list_params_reject_bad_values() {
        let bad_limit = ListTasksParams {
            limit: Some(101),
            ..Default::default()
        };
        assert!(bad_limit.to_query(None).is_err());

        let bad_sort = ListTasksParams {
            sort_by: Some("priority".to_string()),
            ..Default::default()
        };
        assert!(bad_sort.to_query(None).is_err());
    }

    #[test]
    fn job_params_clamp_limit() {
        let params = ListJobsParams {
            state: Some("failed".to_string()),
            limit: Some(10_000),
        };
        assert_eq!(params.state().unwrap(), Some(JobState::Failed));
        assert_eq!(params.limit(), ListJobsParams::MAX_LIMIT);
    }
}
