use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::domain::errors::TaskError;
use crate::domain::events::{Event, EventType};
use crate::domain::task::{ExecutionRecord, Task, TaskOutcome, TaskType};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::StateStore;

use super::execution_tracker::ExecutionTracker;

/// Handler invoked by a queue worker for one task attempt.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<TaskOutcome, TaskError>;
}

/// Execution-side tuning for the task service.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    pub handler_timeout: Duration,
    /// First-retry delay; doubles per attempt.
    pub retry_base: Duration,
    /// Upper bound on the retry delay.
    pub retry_cap: Duration,
    /// Attempt budget for tasks submitted without one.
    pub default_max_attempts: u32,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(300),
            retry_base: Duration::from_secs(1),
            retry_cap: Duration::from_secs(300),
            default_max_attempts: 3,
        }
    }
}

/// Durable task execution: handler registry, submission, and the
/// claim-execute-record pipeline the queue workers drive.
///
/// Exactly one handler per task type; registering a type twice replaces the
/// previous handler. Failures retry with exponential backoff while attempts
/// remain, then the task goes terminal and an `ExecutionFailed` event fires.
pub struct TaskService {
    store: Arc<StateStore>,
    bus: EventBus,
    tracker: Arc<ExecutionTracker>,
    handlers: RwLock<HashMap<TaskType, Arc<dyn TaskHandler>>>,
    policy: ExecutionPolicy,
}

impl TaskService {
    pub fn new(
        store: Arc<StateStore>,
        bus: EventBus,
        tracker: Arc<ExecutionTracker>,
        policy: ExecutionPolicy,
    ) -> Self {
        Self {
            store,
            bus,
            tracker,
            handlers: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub async fn register_handler(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        let previous = self.handlers.write().await.insert(task_type, handler);
        if previous.is_some() {
            warn!("Replaced existing handler for task type {}", task_type);
        } else {
            info!("Registered handler for task type {}", task_type);
        }
    }

    pub async fn registered_types(&self) -> Vec<TaskType> {
        self.handlers.read().await.keys().copied().collect()
    }

    /// Persist a new task and announce it. Returns the task id.
    pub async fn submit(
        &self,
        task_type: TaskType,
        payload: Value,
        priority: Option<i64>,
        schedule_at: Option<DateTime<Utc>>,
        max_attempts: Option<u32>,
    ) -> Result<String, crate::domain::errors::StoreError> {
        let mut task = Task::new(task_type, payload);
        if let Some(priority) = priority {
            task = task.with_priority(priority);
        }
        if let Some(at) = schedule_at {
            task = task.with_schedule_at(at);
        }
        task = task.with_max_attempts(max_attempts.unwrap_or(self.policy.default_max_attempts));

        self.store.enqueue_task(&task).await?;
        self.bus
            .publish(Event::new(
                EventType::TaskSubmitted,
                "task_service",
                json!({ "task_id": task.id, "task_type": task_type.as_str() }),
            ))
            .await;
        Ok(task.id)
    }

    /// Execute a claimed task to its next state: completed, rescheduled, or
    /// failed. Every attempt leaves one execution record.
    pub async fn execute(&self, task: &Task) {
        let started = Instant::now();
        let handler = self.handlers.read().await.get(&task.task_type).cloned();

        let result = match handler {
            None => Err(TaskError::Fatal(format!(
                "no handler registered for task type {}",
                task.task_type
            ))),
            Some(handler) => {
                match tokio::time::timeout(self.policy.handler_timeout, handler.execute(task)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(TaskError::Timeout {
                        timeout_secs: self.policy.handler_timeout.as_secs(),
                    }),
                }
            }
        };
        let duration = started.elapsed().as_secs_f64();

        match result {
            Ok(outcome) => self.finish_completed(task, outcome, duration).await,
            Err(err) => self.finish_failed(task, err, duration).await,
        }
    }

    async fn finish_completed(&self, task: &Task, outcome: TaskOutcome, duration: f64) {
        if let TaskOutcome::Skipped { reason } = &outcome {
            info!(task_id = %task.id, "Task {} skipped: {}", task.task_type, reason);
        }

        let result_value = serde_json::to_value(&outcome).unwrap_or_else(|_| json!({}));
        if let Err(e) = self.store.mark_task_completed(&task.id, &result_value).await {
            error!(task_id = %task.id, "Failed to persist task completion: {e}");
        }

        self.tracker
            .record(ExecutionRecord::scheduled(task, "completed", None, duration))
            .await;

        self.bus
            .publish(Event::new(
                EventType::TaskCompleted,
                "task_service",
                json!({
                    "task_id": task.id,
                    "task_type": task.task_type.as_str(),
                    "duration_seconds": duration,
                }),
            ))
            .await;
    }

    async fn finish_failed(&self, task: &Task, err: TaskError, duration: f64) {
        let message = err.to_string();
        // The claim already counted this attempt.
        let will_retry = err.is_retryable() && task.attempts < task.max_attempts;

        if will_retry {
            let delay = self.retry_delay(task.attempts);
            let retry_at = Utc::now()
                + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(60));
            warn!(
                task_id = %task.id,
                attempt = task.attempts,
                max_attempts = task.max_attempts,
                "Task {} failed ({message}), retrying in {delay:?}",
                task.task_type
            );
            if let Err(e) = self
                .store
                .mark_task_failed(&task.id, &message, Some(retry_at))
                .await
            {
                error!(task_id = %task.id, "Failed to reschedule task: {e}");
            }
        } else {
            error!(
                task_id = %task.id,
                attempt = task.attempts,
                "Task {} failed terminally: {message}",
                task.task_type
            );
            if let Err(e) = self.store.mark_task_failed(&task.id, &message, None).await {
                error!(task_id = %task.id, "Failed to persist task failure: {e}");
            }
            self.bus
                .publish(Event::new(
                    EventType::ExecutionFailed,
                    "task_service",
                    json!({
                        "task_id": task.id,
                        "task_type": task.task_type.as_str(),
                        "error": message,
                    }),
                ))
                .await;
        }

        self.tracker
            .record(ExecutionRecord::scheduled(
                task,
                "failed",
                Some(message),
                duration,
            ))
            .await;
    }

    fn retry_delay(&self, attempts: u32) -> Duration {
        retry_delay(&self.policy, attempts)
    }
}

/// `min(cap, base * 2^(attempts-1))`
fn retry_delay(policy: &ExecutionPolicy, attempts: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempts.saturating_sub(1).min(16));
    (policy.retry_base * factor).min(policy.retry_cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::Database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn execute(&self, _task: &Task) -> Result<TaskOutcome, TaskError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(TaskError::Retryable("transient".to_string()))
            } else {
                Ok(TaskOutcome::completed(json!({"n": n})))
            }
        }
    }

    async fn service(policy: ExecutionPolicy) -> (Arc<StateStore>, TaskService) {
        let db = Database::new("sqlite://:memory:").await.unwrap();
        let store = Arc::new(StateStore::new(&db, Duration::from_secs(10)));
        let tracker = Arc::new(ExecutionTracker::new(store.clone(), 100));
        let bus = EventBus::new();
        (
            store.clone(),
            TaskService::new(store, bus, tracker, policy),
        )
    }

    fn fast_policy() -> ExecutionPolicy {
        ExecutionPolicy {
            handler_timeout: Duration::from_secs(5),
            retry_base: Duration::from_millis(50),
            retry_cap: Duration::from_secs(1),
            default_max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_submit_claim_execute_completes() {
        let (store, service) = service(fast_policy()).await;
        service
            .register_handler(
                TaskType::HealthCheck,
                Arc::new(CountingHandler {
                    calls: AtomicUsize::new(0),
                    fail_first: 0,
                }),
            )
            .await;

        let id = service
            .submit(TaskType::HealthCheck, json!({}), None, None, None)
            .await
            .unwrap();

        let task = store.claim_next_task("health_check").await.unwrap().unwrap();
        service.execute(&task).await;

        let done = store.get_task(&id).await.unwrap();
        assert_eq!(done.status.as_str(), "completed");
        assert_eq!(done.attempts, 1);

        let history = store.query_execution(None, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "completed");
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let (store, service) = service(fast_policy()).await;
        service
            .register_handler(
                TaskType::HealthCheck,
                Arc::new(CountingHandler {
                    calls: AtomicUsize::new(0),
                    fail_first: 1,
                }),
            )
            .await;

        let id = service
            .submit(TaskType::HealthCheck, json!({}), None, None, Some(3))
            .await
            .unwrap();

        // Attempt 1 fails and reschedules.
        let task = store.claim_next_task("health_check").await.unwrap().unwrap();
        service.execute(&task).await;
        let pending = store.get_task(&id).await.unwrap();
        assert_eq!(pending.status.as_str(), "pending");
        assert_eq!(pending.last_error.as_deref(), Some("transient"));

        // Wait past the backoff, then attempt 2 succeeds.
        tokio::time::sleep(Duration::from_millis(80)).await;
        let task = store.claim_next_task("health_check").await.unwrap().unwrap();
        service.execute(&task).await;

        let done = store.get_task(&id).await.unwrap();
        assert_eq!(done.status.as_str(), "completed");
        assert_eq!(done.attempts, 2);
        assert!(done.last_error.is_none());

        let history = store.query_execution(None, 10).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_terminally() {
        let (store, service) = service(fast_policy()).await;
        service
            .register_handler(
                TaskType::HealthCheck,
                Arc::new(CountingHandler {
                    calls: AtomicUsize::new(0),
                    fail_first: usize::MAX,
                }),
            )
            .await;

        let id = service
            .submit(TaskType::HealthCheck, json!({}), None, None, Some(2))
            .await
            .unwrap();

        for _ in 0..2 {
            tokio::time::sleep(Duration::from_millis(80)).await;
            let task = store.claim_next_task("health_check").await.unwrap().unwrap();
            service.execute(&task).await;
        }

        let failed = store.get_task(&id).await.unwrap();
        assert_eq!(failed.status.as_str(), "failed");
        assert_eq!(failed.attempts, 2);
        assert!(failed.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_skip_outcome_is_terminal_completed() {
        struct SkippingHandler;
        #[async_trait]
        impl TaskHandler for SkippingHandler {
            async fn execute(&self, _task: &Task) -> Result<TaskOutcome, TaskError> {
                Ok(TaskOutcome::skipped("no_symbols"))
            }
        }

        let (store, service) = service(fast_policy()).await;
        service
            .register_handler(TaskType::NewsMonitoring, Arc::new(SkippingHandler))
            .await;

        let id = service
            .submit(TaskType::NewsMonitoring, json!({}), None, None, None)
            .await
            .unwrap();
        let task = store
            .claim_next_task("news_monitoring")
            .await
            .unwrap()
            .unwrap();
        service.execute(&task).await;

        let done = store.get_task(&id).await.unwrap();
        assert_eq!(done.status.as_str(), "completed");
    }

    #[tokio::test]
    async fn test_missing_handler_fails_without_retry() {
        let (store, service) = service(fast_policy()).await;

        let id = service
            .submit(TaskType::EarningsCheck, json!({}), None, None, Some(5))
            .await
            .unwrap();
        let task = store
            .claim_next_task("earnings_check")
            .await
            .unwrap()
            .unwrap();
        service.execute(&task).await;

        let failed = store.get_task(&id).await.unwrap();
        assert_eq!(failed.status.as_str(), "failed");
        assert_eq!(failed.attempts, 1);
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let policy = ExecutionPolicy {
            handler_timeout: Duration::from_secs(1),
            retry_base: Duration::from_secs(1),
            retry_cap: Duration::from_secs(5),
            default_max_attempts: 3,
        };
        assert_eq!(retry_delay(&policy, 1), Duration::from_secs(1));
        assert_eq!(retry_delay(&policy, 2), Duration::from_secs(2));
        assert_eq!(retry_delay(&policy, 3), Duration::from_secs(4));
        assert_eq!(retry_delay(&policy, 4), Duration::from_secs(5));
        assert_eq!(retry_delay(&policy, 30), Duration::from_secs(5));
    }
}
