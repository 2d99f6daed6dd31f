use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::intent::Intent;
use crate::domain::portfolio::PortfolioSnapshot;

/// A news article (or provider summary of one) tied to a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: Option<i64>,
    pub symbol: String,
    pub title: String,
    pub summary: String,
    pub content: Option<String>,
    pub source: Option<String>,
    pub sentiment: String,
    pub relevance_score: f64,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub citations: Vec<String>,
}

impl NewsItem {
    pub fn new(symbol: impl Into<String>, title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: None,
            symbol: symbol.into(),
            title: title.into(),
            summary: summary.into(),
            content: None,
            source: None,
            sentiment: "neutral".to_string(),
            relevance_score: 0.5,
            published_at: Utc::now(),
            fetched_at: Utc::now(),
            citations: Vec::new(),
        }
    }

    pub fn sentiment_signum(&self) -> f64 {
        match self.sentiment.as_str() {
            "positive" => 1.0,
            "negative" => -1.0,
            _ => 0.0,
        }
    }
}

/// One quarterly earnings report. Unique per `(symbol, fiscal_period)`;
/// re-fetching the same period updates actuals/estimates in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsReport {
    pub id: Option<i64>,
    pub symbol: String,
    pub fiscal_period: String,
    pub fiscal_year: Option<i64>,
    pub fiscal_quarter: Option<i64>,
    pub report_date: NaiveDate,
    pub eps_actual: Option<f64>,
    pub eps_estimated: Option<f64>,
    pub revenue_actual: Option<f64>,
    pub revenue_estimated: Option<f64>,
    pub surprise_pct: Option<f64>,
    pub guidance: Option<String>,
    pub next_earnings_date: Option<NaiveDate>,
    pub fetched_at: DateTime<Utc>,
}

impl EarningsReport {
    pub fn new(
        symbol: impl Into<String>,
        fiscal_period: impl Into<String>,
        report_date: NaiveDate,
    ) -> Self {
        Self {
            id: None,
            symbol: symbol.into(),
            fiscal_period: fiscal_period.into(),
            fiscal_year: None,
            fiscal_quarter: None,
            report_date,
            eps_actual: None,
            eps_estimated: None,
            revenue_actual: None,
            revenue_estimated: None,
            surprise_pct: None,
            guidance: None,
            next_earnings_date: None,
            fetched_at: Utc::now(),
        }
    }
}

/// Kind selector for per-symbol fetch-interval tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    News,
    Earnings,
}

/// Named rollback point: portfolio plus open intents, frozen at a moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
    pub portfolio: Option<PortfolioSnapshot>,
    pub intents: Vec<Intent>,
}

impl Checkpoint {
    pub fn new(
        name: impl Into<String>,
        metadata: Value,
        portfolio: Option<PortfolioSnapshot>,
        intents: Vec<Intent>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            timestamp: Utc::now(),
            metadata,
            portfolio,
            intents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_news_item_defaults() {
        let item = NewsItem::new("INFY", "Q1 beat", "Infosys beats estimates");
        assert_eq!(item.sentiment, "neutral");
        assert_eq!(item.relevance_score, 0.5);
        assert_eq!(item.sentiment_signum(), 0.0);
    }

    #[test]
    fn test_sentiment_signum() {
        let mut item = NewsItem::new("INFY", "t", "s");
        item.sentiment = "positive".to_string();
        assert_eq!(item.sentiment_signum(), 1.0);
        item.sentiment = "negative".to_string();
        assert_eq!(item.sentiment_signum(), -1.0);
    }
}
