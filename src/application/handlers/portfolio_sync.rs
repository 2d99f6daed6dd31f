use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::application::scheduler::TaskHandler;
use crate::domain::errors::TaskError;
use crate::domain::events::{Event, EventType};
use crate::domain::task::{Task, TaskOutcome};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::StateStore;

/// Simulated broker sync: reprices holdings with a small random walk and
/// replaces the portfolio snapshot.
///
/// Stands in for the real balance/positions pull; the snapshot-replace
/// write path and the `PortfolioUpdated` fan-out are the real thing.
pub struct PortfolioSyncHandler {
    store: Arc<StateStore>,
    bus: EventBus,
}

impl PortfolioSyncHandler {
    pub fn new(store: Arc<StateStore>, bus: EventBus) -> Self {
        Self { store, bus }
    }
}

#[async_trait]
impl TaskHandler for PortfolioSyncHandler {
    async fn execute(&self, _task: &Task) -> Result<TaskOutcome, TaskError> {
        let Some(mut snapshot) = self.store.get_portfolio().await? else {
            return Ok(TaskOutcome::skipped("no_portfolio"));
        };

        for holding in &mut snapshot.holdings {
            // Walk each price by up to ±1%.
            let drift = rand::rng().random_range(-0.01..=0.01);
            let factor = Decimal::from_f64(1.0 + drift).unwrap_or(Decimal::ONE);
            let new_price = (holding.last_price * factor).round_dp(2);
            holding.reprice(new_price);
        }
        snapshot.exposure_total = snapshot.total_exposure();
        snapshot.as_of = Utc::now();

        self.store.put_portfolio(&snapshot).await?;
        self.bus
            .publish(Event::new(
                EventType::PortfolioUpdated,
                "portfolio_sync",
                json!({
                    "positions": snapshot.holdings.len(),
                    "exposure_total": snapshot.exposure_total.to_string(),
                }),
            ))
            .await;

        info!(
            "Portfolio synced: {} positions, exposure {}",
            snapshot.holdings.len(),
            snapshot.exposure_total
        );
        Ok(TaskOutcome::completed(json!({
            "positions": snapshot.holdings.len(),
        })))
    }
}
