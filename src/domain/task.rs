use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Closed set of background work the scheduler knows how to execute.
///
/// The wire name doubles as the default queue key, so all tasks of one type
/// run sequentially unless a submitter overrides the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    NewsMonitoring,
    EarningsCheck,
    FundamentalsUpdate,
    RecommendationGeneration,
    PortfolioSync,
    RiskValidation,
    HealthCheck,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::NewsMonitoring,
        TaskType::EarningsCheck,
        TaskType::FundamentalsUpdate,
        TaskType::RecommendationGeneration,
        TaskType::PortfolioSync,
        TaskType::RiskValidation,
        TaskType::HealthCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::NewsMonitoring => "news_monitoring",
            TaskType::EarningsCheck => "earnings_check",
            TaskType::FundamentalsUpdate => "fundamentals_update",
            TaskType::RecommendationGeneration => "recommendation_generation",
            TaskType::PortfolioSync => "portfolio_sync",
            TaskType::RiskValidation => "risk_validation",
            TaskType::HealthCheck => "health_check",
        }
    }

    /// Task types that only make sense while the market is trading.
    pub fn market_hours_only(&self) -> bool {
        matches!(self, TaskType::NewsMonitoring | TaskType::PortfolioSync)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "news_monitoring" => Ok(TaskType::NewsMonitoring),
            "earnings_check" => Ok(TaskType::EarningsCheck),
            "fundamentals_update" => Ok(TaskType::FundamentalsUpdate),
            "recommendation_generation" => Ok(TaskType::RecommendationGeneration),
            "portfolio_sync" => Ok(TaskType::PortfolioSync),
            "risk_validation" => Ok(TaskType::RiskValidation),
            "health_check" => Ok(TaskType::HealthCheck),
            _ => anyhow::bail!("Unknown task type: {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => anyhow::bail!("Unknown task status: {}", s),
        }
    }
}

/// A durable unit of deferred work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub payload: Value,
    pub status: TaskStatus,
    pub priority: i64,
    pub queue_key: String,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
}

impl Task {
    pub fn new(task_type: TaskType, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type,
            payload,
            status: TaskStatus::Pending,
            priority: 0,
            queue_key: task_type.as_str().to_string(),
            scheduled_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempts: 0,
            max_attempts: 3,
            last_error: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_schedule_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = at;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_queue_key(mut self, queue_key: impl Into<String>) -> Self {
        self.queue_key = queue_key.into();
        self
    }

    /// Symbols this task operates on, if the payload carries any.
    pub fn symbols(&self) -> Vec<String> {
        self.payload
            .get("symbols")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// What a handler produced for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { result: Value },
    /// Nothing to do (e.g. no symbols). Terminal, never retried.
    Skipped { reason: String },
}

impl TaskOutcome {
    pub fn completed(result: Value) -> Self {
        TaskOutcome::Completed { result }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        TaskOutcome::Skipped {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    Scheduled,
    Manual,
}

impl ExecutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionType::Scheduled => "scheduled",
            ExecutionType::Manual => "manual",
        }
    }
}

impl FromStr for ExecutionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(ExecutionType::Scheduled),
            "manual" => Ok(ExecutionType::Manual),
            _ => anyhow::bail!("Unknown execution type: {}", s),
        }
    }
}

/// Immutable record of one task attempt, kept for operator visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub task_name: String,
    pub task_id: String,
    pub execution_type: ExecutionType,
    pub user: String,
    pub timestamp: DateTime<Utc>,
    pub symbols: Vec<String>,
    pub status: String,
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl ExecutionRecord {
    pub fn scheduled(task: &Task, status: &str, error: Option<String>, duration: f64) -> Self {
        Self {
            task_name: task.task_type.as_str().to_string(),
            task_id: task.id.clone(),
            execution_type: ExecutionType::Scheduled,
            user: "system".to_string(),
            timestamp: Utc::now(),
            symbols: task.symbols(),
            status: status.to_string(),
            error,
            duration_seconds: duration,
        }
    }
}

/// One row of the background-task configuration table: whether a task type
/// is periodically scheduled, and how often.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_name: TaskType,
    pub enabled: bool,
    pub frequency_seconds: i64,
    pub use_claude: bool,
    pub priority: i64,
}

impl TaskSpec {
    pub fn new(task_name: TaskType, frequency_seconds: i64, priority: i64) -> Self {
        Self {
            task_name,
            enabled: true,
            frequency_seconds,
            use_claude: false,
            priority,
        }
    }
}
