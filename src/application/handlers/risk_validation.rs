use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::scheduler::TaskHandler;
use crate::config::RiskEnvConfig;
use crate::domain::errors::TaskError;
use crate::domain::task::{Task, TaskOutcome};
use crate::infrastructure::persistence::StateStore;

/// Checks the portfolio against the configured risk limits.
///
/// Violations are findings, not failures: the task completes with the list
/// so operators and downstream handlers can react.
pub struct RiskValidationHandler {
    store: Arc<StateStore>,
    limits: RiskEnvConfig,
}

impl RiskValidationHandler {
    pub fn new(store: Arc<StateStore>, limits: RiskEnvConfig) -> Self {
        Self { store, limits }
    }
}

#[async_trait]
impl TaskHandler for RiskValidationHandler {
    async fn execute(&self, _task: &Task) -> Result<TaskOutcome, TaskError> {
        let Some(snapshot) = self.store.get_portfolio().await? else {
            return Ok(TaskOutcome::skipped("no_portfolio"));
        };

        let mut violations = Vec::new();
        let max_single = self.limits.max_single_symbol_exposure_percent / 100.0;

        for holding in &snapshot.holdings {
            let fraction = snapshot
                .exposure_fraction(&holding.symbol)
                .to_f64()
                .unwrap_or(0.0);
            if fraction > max_single {
                violations.push(json!({
                    "kind": "single_symbol_exposure",
                    "symbol": holding.symbol,
                    "exposure_pct": fraction * 100.0,
                    "limit_pct": self.limits.max_single_symbol_exposure_percent,
                }));
            }

            if holding.qty.is_sign_negative() {
                violations.push(json!({
                    "kind": "negative_quantity",
                    "symbol": holding.symbol,
                }));
            }
        }

        // Portfolio risk estimate: the loss if every position hit its stop.
        let total_cash: f64 = snapshot
            .cash
            .values()
            .filter_map(|v| v.to_f64())
            .sum();
        let exposure = snapshot.exposure_total.to_f64().unwrap_or(0.0);
        let equity = total_cash + exposure;
        if equity > 0.0 {
            let at_risk = exposure * self.limits.stop_loss_percent / 100.0;
            let risk_pct = at_risk / equity * 100.0;
            if risk_pct > self.limits.max_portfolio_risk_percent {
                violations.push(json!({
                    "kind": "portfolio_risk",
                    "risk_pct": risk_pct,
                    "limit_pct": self.limits.max_portfolio_risk_percent,
                }));
            }
        }

        if violations.is_empty() {
            info!("Risk validation passed ({} holdings)", snapshot.holdings.len());
        } else {
            warn!(
                "Risk validation found {} violations across {} holdings",
                violations.len(),
                snapshot.holdings.len()
            );
        }

        Ok(TaskOutcome::completed(json!({
            "holdings_checked": snapshot.holdings.len(),
            "violations": violations,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::portfolio::{Holding, PortfolioSnapshot};
    use crate::infrastructure::persistence::Database;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn limits() -> RiskEnvConfig {
        RiskEnvConfig {
            max_position_size_percent: 5.0,
            max_portfolio_risk_percent: 10.0,
            max_single_symbol_exposure_percent: 15.0,
            stop_loss_percent: 2.0,
            max_daily_trades: 10,
            max_daily_loss_percent: 3.0,
        }
    }

    fn holding(symbol: &str, exposure: rust_decimal::Decimal) -> Holding {
        Holding {
            symbol: symbol.to_string(),
            qty: dec!(1),
            avg_price: exposure,
            last_price: exposure,
            pnl: dec!(0),
            exposure,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_concentrated_position_is_flagged() {
        let db = Database::new("sqlite://:memory:").await.unwrap();
        let store = Arc::new(StateStore::new(&db, Duration::from_secs(10)));

        let mut snap = PortfolioSnapshot::empty();
        // 90% of exposure in one name.
        snap.holdings.push(holding("INFY", dec!(90000)));
        snap.holdings.push(holding("TCS", dec!(10000)));
        snap.exposure_total = dec!(100000);
        store.put_portfolio(&snap).await.unwrap();

        let handler = RiskValidationHandler::new(store, limits());
        let task = Task::new(crate::domain::task::TaskType::RiskValidation, json!({}));
        let outcome = handler.execute(&task).await.unwrap();

        match outcome {
            TaskOutcome::Completed { result } => {
                let violations = result["violations"].as_array().unwrap();
                assert!(violations
                    .iter()
                    .any(|v| v["kind"] == "single_symbol_exposure" && v["symbol"] == "INFY"));
                // TCS at 10% is within the 15% limit.
                assert!(!violations.iter().any(|v| v["symbol"] == "TCS"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_balanced_portfolio_passes() {
        let db = Database::new("sqlite://:memory:").await.unwrap();
        let store = Arc::new(StateStore::new(&db, Duration::from_secs(10)));

        let mut snap = PortfolioSnapshot::empty();
        for symbol in ["A", "B", "C", "D", "E", "F", "G", "H"] {
            snap.holdings.push(holding(symbol, dec!(1000)));
        }
        snap.exposure_total = dec!(8000);
        snap.cash.insert("INR".to_string(), dec!(92000));
        store.put_portfolio(&snap).await.unwrap();

        let handler = RiskValidationHandler::new(store, limits());
        let task = Task::new(crate::domain::task::TaskType::RiskValidation, json!({}));
        let outcome = handler.execute(&task).await.unwrap();

        match outcome {
            TaskOutcome::Completed { result } => {
                assert!(result["violations"].as_array().unwrap().is_empty());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
