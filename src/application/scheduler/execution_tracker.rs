use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

use crate::domain::task::ExecutionRecord;
use crate::infrastructure::persistence::StateStore;

/// Aggregate view over recent execution records.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub average_duration_seconds: f64,
    pub by_task: HashMap<String, usize>,
}

/// Records every task attempt and answers history queries.
///
/// Recording never propagates errors to the worker: a failed write is an
/// observability gap, not a reason to fail the task it describes.
pub struct ExecutionTracker {
    store: Arc<StateStore>,
    max_history: i64,
}

impl ExecutionTracker {
    pub fn new(store: Arc<StateStore>, max_history: i64) -> Self {
        Self { store, max_history }
    }

    pub async fn record(&self, record: ExecutionRecord) {
        if let Err(e) = self.store.record_execution(&record, self.max_history).await {
            error!(
                task = %record.task_name,
                "Failed to record execution: {e}"
            );
        }
    }

    pub async fn history(
        &self,
        task_name: Option<&str>,
        limit: i64,
    ) -> Vec<ExecutionRecord> {
        match self.store.query_execution(task_name, limit).await {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to query execution history: {e}");
                Vec::new()
            }
        }
    }

    pub async fn stats(&self) -> ExecutionStats {
        let records = self.history(None, self.max_history).await;
        let total = records.len();
        let completed = records.iter().filter(|r| r.status == "completed").count();
        let failed = records.iter().filter(|r| r.status == "failed").count();
        let average_duration_seconds = if total > 0 {
            records.iter().map(|r| r.duration_seconds).sum::<f64>() / total as f64
        } else {
            0.0
        };

        let mut by_task = HashMap::new();
        for record in &records {
            *by_task.entry(record.task_name.clone()).or_insert(0) += 1;
        }

        ExecutionStats {
            total,
            completed,
            failed,
            average_duration_seconds,
            by_task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::{Task, TaskType};
    use crate::infrastructure::persistence::Database;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stats_aggregation() {
        let db = Database::new("sqlite://:memory:").await.unwrap();
        let store = Arc::new(StateStore::new(&db, Duration::from_secs(10)));
        let tracker = ExecutionTracker::new(store, 100);

        let task = Task::new(TaskType::NewsMonitoring, json!({}));
        tracker
            .record(ExecutionRecord::scheduled(&task, "completed", None, 1.0))
            .await;
        tracker
            .record(ExecutionRecord::scheduled(
                &task,
                "failed",
                Some("boom".to_string()),
                3.0,
            ))
            .await;

        let stats = tracker.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert!((stats.average_duration_seconds - 2.0).abs() < 1e-9);
        assert_eq!(stats.by_task["news_monitoring"], 2);
    }
}
