use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::application::parsers;
use crate::application::scheduler::TaskHandler;
use crate::domain::errors::{StoreError, TaskError};
use crate::domain::events::{Event, EventType};
use crate::domain::research::FetchKind;
use crate::domain::task::{Task, TaskOutcome};
use crate::infrastructure::api::{queries, ProviderClient};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::StateStore;

use super::resolve_symbols;

/// Fetches the latest earnings data for portfolio symbols.
///
/// A fiscal period already on file is left alone: the unique key collision
/// means the provider re-reported a quarter we already hold.
pub struct EarningsCheckHandler {
    store: Arc<StateStore>,
    client: Arc<ProviderClient>,
    bus: EventBus,
    min_fetch_interval: ChronoDuration,
}

impl EarningsCheckHandler {
    pub fn new(store: Arc<StateStore>, client: Arc<ProviderClient>, bus: EventBus) -> Self {
        Self {
            store,
            client,
            bus,
            min_fetch_interval: ChronoDuration::hours(6),
        }
    }
}

#[async_trait]
impl TaskHandler for EarningsCheckHandler {
    async fn execute(&self, task: &Task) -> Result<TaskOutcome, TaskError> {
        let symbols = resolve_symbols(task, &self.store).await?;
        if symbols.is_empty() {
            return Ok(TaskOutcome::skipped("no_symbols"));
        }
        if !self.client.has_keys().await {
            return Ok(TaskOutcome::skipped("no_api_keys"));
        }

        let now = Utc::now();
        let mut due = Vec::new();
        for symbol in symbols {
            match self
                .store
                .get_last_fetch(&symbol, FetchKind::Earnings)
                .await?
            {
                Some(last) if now - last < self.min_fetch_interval => {
                    debug!("Earnings for {} fetched recently, skipping", symbol);
                }
                _ => due.push(symbol),
            }
        }
        if due.is_empty() {
            return Ok(TaskOutcome::skipped("recently_fetched"));
        }

        let payload = self
            .client
            .call(&queries::news_and_earnings(&due))
            .await
            .map_err(TaskError::from_api)?;
        let stocks = parsers::stocks_map(&payload)?;

        let mut saved = 0usize;
        let mut already_known = 0usize;
        for symbol in &due {
            if let Some(report) = stocks.get(symbol).and_then(|e| parsers::parse_earnings(symbol, e))
            {
                match self.store.save_earnings_report(&report).await {
                    Ok(_) => {
                        saved += 1;
                        self.bus
                            .publish(Event::new(
                                EventType::EarningsFetched,
                                "earnings_check",
                                json!({
                                    "symbol": symbol,
                                    "fiscal_period": report.fiscal_period,
                                }),
                            ))
                            .await;
                    }
                    Err(StoreError::Conflict { .. }) => {
                        debug!(
                            "Earnings {}/{} already on file",
                            symbol, report.fiscal_period
                        );
                        already_known += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            self.store
                .set_last_fetch(symbol, FetchKind::Earnings, now)
                .await?;
        }

        info!(
            "Earnings check: {} new, {} already known, {} symbols",
            saved,
            already_known,
            due.len()
        );
        Ok(TaskOutcome::completed(json!({
            "symbols_processed": due.len(),
            "reports_saved": saved,
            "already_known": already_known,
        })))
    }
}
