use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::application::scheduler::TaskHandler;
use crate::domain::analysis::{Recommendation, RecommendationType};
use crate::domain::errors::TaskError;
use crate::domain::events::{Event, EventType};
use crate::domain::task::{Task, TaskOutcome};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::persistence::StateStore;

use super::resolve_symbols;

/// Produces BUY/HOLD/SELL recommendations from stored analysis.
///
/// Scoring is simulated: the latest fundamental composite score nudged by
/// recent news sentiment. Symbols without any stored analysis are skipped
/// rather than guessed at.
pub struct RecommendationGenerationHandler {
    store: Arc<StateStore>,
    bus: EventBus,
}

impl RecommendationGenerationHandler {
    pub fn new(store: Arc<StateStore>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    async fn score_symbol(&self, symbol: &str) -> Result<Option<(f64, String)>, TaskError> {
        let fundamentals = self.store.get_fundamental_analysis(symbol, 1).await?;
        let Some(latest) = fundamentals.first() else {
            return Ok(None);
        };

        let base = latest.overall_score.unwrap_or(50.0);

        // Recent news tilts the score by up to ±10 points.
        let news = self.store.list_news(symbol, 10).await?;
        let sentiment: f64 = news.iter().map(|n| n.sentiment_signum()).sum();
        let tilt = (sentiment * 2.5).clamp(-10.0, 10.0);

        let score = (base + tilt).clamp(0.0, 100.0);
        let reasoning = format!(
            "fundamental score {:.1}, news sentiment {:+.1} over {} recent items",
            base,
            tilt,
            news.len()
        );
        Ok(Some((score, reasoning)))
    }
}

#[async_trait]
impl TaskHandler for RecommendationGenerationHandler {
    async fn execute(&self, task: &Task) -> Result<TaskOutcome, TaskError> {
        let symbols = resolve_symbols(task, &self.store).await?;
        if symbols.is_empty() {
            return Ok(TaskOutcome::skipped("no_symbols"));
        }

        let mut generated = 0usize;
        let mut skipped = 0usize;
        for symbol in &symbols {
            let Some((score, reasoning)) = self.score_symbol(symbol).await? else {
                skipped += 1;
                continue;
            };

            let recommendation_type = if score >= 65.0 {
                RecommendationType::Buy
            } else if score <= 35.0 {
                RecommendationType::Sell
            } else {
                RecommendationType::Hold
            };
            let confidence = ((score - 50.0).abs() / 50.0).clamp(0.05, 0.95);

            let mut rec =
                Recommendation::new(symbol, recommendation_type, confidence, reasoning);
            rec.risk_level = if confidence > 0.6 { "low" } else { "medium" }.to_string();
            let id = self.store.save_recommendation(&rec).await?;
            generated += 1;

            self.bus
                .publish(Event::new(
                    EventType::RecommendationCreated,
                    "recommendation_generation",
                    json!({
                        "recommendation_id": id,
                        "symbol": symbol,
                        "type": recommendation_type.as_str(),
                        "confidence": confidence,
                    }),
                ))
                .await;
        }

        if generated == 0 {
            return Ok(TaskOutcome::skipped("no_analysis_available"));
        }

        info!(
            "Generated {} recommendations ({} symbols without analysis)",
            generated, skipped
        );
        Ok(TaskOutcome::completed(json!({
            "recommendations": generated,
            "symbols_without_analysis": skipped,
        })))
    }
}
