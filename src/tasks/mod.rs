//! Follow-up task hand-off. The engine does not own a task board; it
//! describes the task it wants and a sink owned by the host system
//! creates it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::tickets::Priority;

#[derive(Debug, Clone, Serialize)]
pub struct TaskRequest {
    pub ticket_id: Uuid,
    pub ticket_number: String,
    pub title: String,
    pub suggested_priority: Priority,
    pub requested_by: Uuid,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn create_task(&self, request: TaskRequest) -> anyhow::Result<()>;
}

pub struct LogTaskSink;

#[async_trait]
impl TaskSink for LogTaskSink {
    async fn create_task(&self, request: TaskRequest) -> anyhow::Result<()> {
        log::info!(
            "task requested: \"{}\" for ticket {} (suggested priority {})",
            request.title,
            request.ticket_number,
            request.suggested_priority,
        );
        Ok(())
    }
}
