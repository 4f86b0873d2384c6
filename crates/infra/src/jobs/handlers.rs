//! Job handlers, one per [`JobKind`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::task::JoinError;
use tracing::info;

use taskforge_core::DomainError;
use taskforge_tasks::Task;

use super::types::{JobKind, Payload};

/// Default simulated reminder delivery time.
pub const DEFAULT_REMINDER_DURATION: Duration = Duration::from_millis(1000);

/// Default simulated report generation time.
pub const DEFAULT_REPORT_DURATION: Duration = Duration::from_millis(3000);

/// Report type used when the payload does not name one.
pub const DEFAULT_REPORT_TYPE: &str = "task-completion";

/// Why a handler run failed. Recorded on the job, never surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Task(#[from] DomainError),
    #[error("handler timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

impl From<JoinError> for HandlerError {
    fn from(err: JoinError) -> Self {
        if !err.is_panic() {
            return Self::failed("handler was cancelled");
        }
        let panic = err.into_panic();
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self::Panicked(message)
    }
}

/// Executes one kind of job against the task it belongs to.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, task: &Task, payload: &Payload) -> Result<Value, HandlerError>;
}

/// Sends a reminder for a task.
#[derive(Debug, Clone)]
pub struct ReminderHandler {
    delivery_time: Duration,
}

impl ReminderHandler {
    pub fn new(delivery_time: Duration) -> Self {
        Self { delivery_time }
    }
}

impl Default for ReminderHandler {
    fn default() -> Self {
        Self::new(DEFAULT_REMINDER_DURATION)
    }
}

#[async_trait]
impl JobHandler for ReminderHandler {
    async fn execute(&self, task: &Task, _payload: &Payload) -> Result<Value, HandlerError> {
        tokio::time::sleep(self.delivery_time).await;

        info!(
            task_id = %task.id,
            title = %task.title,
            assigned_to = task.assigned_to.as_deref().unwrap_or("unassigned"),
            due_date = ?task.due_date,
            "reminder sent"
        );

        Ok(json!({
            "success": true,
            "message": format!("Reminder sent for task: {}", task.title),
        }))
    }
}

/// Builds a summary report for a task.
#[derive(Debug, Clone)]
pub struct ReportHandler {
    generation_time: Duration,
}

impl ReportHandler {
    pub fn new(generation_time: Duration) -> Self {
        Self { generation_time }
    }
}

impl Default for ReportHandler {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_DURATION)
    }
}

#[async_trait]
impl JobHandler for ReportHandler {
    async fn execute(&self, task: &Task, payload: &Payload) -> Result<Value, HandlerError> {
        let report_type = payload
            .get("reportType")
            .filter(|v| is_truthy(v))
            .cloned()
            .unwrap_or_else(|| Value::from(DEFAULT_REPORT_TYPE));

        tokio::time::sleep(self.generation_time).await;

        info!(task_id = %task.id, %report_type, "report generated");

        Ok(json!({
            "success": true,
            "report": {
                "taskId": task.id,
                "title": task.title,
                "status": task.status,
                "assignedTo": task.assigned_to,
                "dueDate": task.due_date,
                "reportType": report_type,
            },
        }))
    }
}

/// Empty strings, `false`, zero and null count as "not given".
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Handler lookup by job kind.
#[derive(Clone)]
pub struct HandlerRegistry {
    reminder: Arc<dyn JobHandler>,
    report: Arc<dyn JobHandler>,
}

impl HandlerRegistry {
    pub fn new(reminder: Arc<dyn JobHandler>, report: Arc<dyn JobHandler>) -> Self {
        Self { reminder, report }
    }

    /// Built-in handlers with the given simulated durations.
    pub fn with_durations(reminder: Duration, report: Duration) -> Self {
        Self::new(
            Arc::new(ReminderHandler::new(reminder)),
            Arc::new(ReportHandler::new(report)),
        )
    }

    pub fn for_kind(&self, kind: JobKind) -> Arc<dyn JobHandler> {
        match kind {
            JobKind::Reminder => Arc::clone(&self.reminder),
            JobKind::Report => Arc::clone(&self.report),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_durations(DEFAULT_REMINDER_DURATION, DEFAULT_REPORT_DURATION)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").finish_non_exhaustive()
    }
}
