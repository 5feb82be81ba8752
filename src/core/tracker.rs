// src/core/tracker.rs

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::error::{ScanError, ScanResult};
use crate::core::models::{TaskExecution, TaskStatus};
use crate::core::store::{ExecutionPatch, Store};

/// Stage label written when an execution is abandoned.
pub const FAILED_STAGE: &str = "task failed";

/// Persists the progress of one scan run so clients can poll it.
#[derive(Clone)]
pub struct TaskTracker {
    store: Arc<dyn Store>,
}

impl TaskTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create(&self, scheduled_task_id: Option<Uuid>) -> ScanResult<TaskExecution> {
        let execution = TaskExecution {
            id: Uuid::new_v4(),
            scheduled_task_id,
            status: TaskStatus::Running,
            stage: String::new(),
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            assets_found: 0,
        };
        Ok(self.store.create_task_execution(execution).await?)
    }

    /// Best effort: a failed write is logged and swallowed.
    pub async fn update_stage(&self, id: Uuid, stage: impl Into<String>) {
        let stage = stage.into();
        debug!(task_execution_id = %id, stage = %stage, "Stage update.");
        let patch = ExecutionPatch { stage: Some(stage), ..Default::default() };
        if let Err(e) = self.store.update_task_execution(id, patch).await {
            warn!(task_execution_id = %id, error = %e, "Failed to record execution stage.");
        }
    }

    /// Writes the terminal status, `end_time` and whole-second `duration`.
    pub async fn finalize(
        &self,
        id: Uuid,
        status: TaskStatus,
        assets_found: Option<usize>,
    ) -> ScanResult<TaskExecution> {
        let execution = self.find(id).await?;
        let end_time = Utc::now();
        let duration = (end_time - execution.start_time).num_seconds();
        let patch = ExecutionPatch {
            status: Some(status),
            stage: (status == TaskStatus::Failed).then(|| FAILED_STAGE.to_string()),
            end_time: Some(end_time),
            duration: Some(duration),
            assets_found,
        };
        Ok(self.store.update_task_execution(id, patch).await?)
    }

    /// Marks the execution failed, logging instead of returning any write error.
    pub async fn fail(&self, id: Uuid) {
        if let Err(e) = self.finalize(id, TaskStatus::Failed, None).await {
            warn!(task_execution_id = %id, error = %e, "Failed to record execution failure.");
        }
    }

    pub async fn find(&self, id: Uuid) -> ScanResult<TaskExecution> {
        self.store
            .find_task_execution(id)
            .await?
            .ok_or(ScanError::ExecutionNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::MemoryStore;

    fn tracker() -> TaskTracker {
        TaskTracker::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn new_execution_starts_running_with_no_assets() {
        let tracker = tracker();
        let execution = tracker.create(None).await.unwrap();
        assert_eq!(execution.status, TaskStatus::Running);
        assert_eq!(execution.assets_found, 0);
        assert!(execution.end_time.is_none());
    }

    #[tokio::test]
    async fn finalize_sets_end_time_and_duration() {
        let tracker = tracker();
        let execution = tracker.create(None).await.unwrap();
        tracker.update_stage(execution.id, "crawling").await;

        let done = tracker.finalize(execution.id, TaskStatus::Completed, Some(3)).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.assets_found, 3);
        assert_eq!(done.stage, "crawling");
        assert!(done.end_time.unwrap() >= done.start_time);
        assert!(done.duration.unwrap() >= 0);
    }

    #[tokio::test]
    async fn failure_writes_the_literal_stage() {
        let tracker = tracker();
        let execution = tracker.create(None).await.unwrap();
        tracker.fail(execution.id).await;
        let failed = tracker.find(execution.id).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.stage, FAILED_STAGE);
    }

    #[tokio::test]
    async fn stage_update_on_unknown_execution_does_not_panic() {
        let tracker = tracker();
        tracker.update_stage(Uuid::new_v4(), "ignored").await;
        assert!(matches!(tracker.find(Uuid::new_v4()).await, Err(ScanError::ExecutionNotFound(_))));
    }
}
