//! Task handlers: the domain plug-ins executed by queue workers.
//!
//! Handlers consume the substrate (state store, provider client, event bus)
//! and hold the simulated trading heuristics. Each one is registered with
//! the task service under its task type at application build.

mod earnings;
mod fundamentals;
mod health;
mod news;
mod portfolio_sync;
mod recommendations;
mod risk_validation;

pub use earnings::EarningsCheckHandler;
pub use fundamentals::FundamentalsUpdateHandler;
pub use health::HealthCheckHandler;
pub use news::NewsMonitoringHandler;
pub use portfolio_sync::PortfolioSyncHandler;
pub use recommendations::RecommendationGenerationHandler;
pub use risk_validation::RiskValidationHandler;

use std::sync::Arc;

use crate::domain::errors::TaskError;
use crate::domain::task::Task;
use crate::infrastructure::persistence::StateStore;

/// Symbols a task applies to: the payload's list when present, otherwise
/// the current portfolio holdings.
pub(crate) async fn resolve_symbols(
    task: &Task,
    store: &Arc<StateStore>,
) -> Result<Vec<String>, TaskError> {
    let from_payload = task.symbols();
    if !from_payload.is_empty() {
        return Ok(from_payload);
    }
    let portfolio = store.get_portfolio().await?;
    Ok(portfolio.map(|p| p.symbols()).unwrap_or_default())
}
