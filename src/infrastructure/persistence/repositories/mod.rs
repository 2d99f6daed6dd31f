mod analysis_repository;
mod checkpoint_repository;
mod execution_history_repository;
mod intent_repository;
mod portfolio_repository;
mod research_repository;
mod task_config_repository;
mod task_repository;

pub use analysis_repository::SqliteAnalysisRepository;
pub use checkpoint_repository::SqliteCheckpointRepository;
pub use execution_history_repository::SqliteExecutionHistoryRepository;
pub use intent_repository::SqliteIntentRepository;
pub use portfolio_repository::SqlitePortfolioRepository;
pub use research_repository::SqliteResearchRepository;
pub use task_config_repository::SqliteTaskConfigRepository;
pub use task_repository::SqliteTaskRepository;
