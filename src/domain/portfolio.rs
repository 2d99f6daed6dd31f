use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One position in the portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_price: Decimal,
    pub last_price: Decimal,
    pub pnl: Decimal,
    pub exposure: Decimal,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Holding {
    /// Recompute derived fields from the current price.
    pub fn reprice(&mut self, last_price: Decimal) {
        self.last_price = last_price;
        self.exposure = self.qty * last_price;
        self.pnl = (last_price - self.avg_price) * self.qty;
    }
}

/// Whole-portfolio snapshot. Replaced atomically, never mutated in place;
/// readers always see a consistent as_of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub as_of: DateTime<Utc>,
    /// Currency code to available cash.
    pub cash: HashMap<String, Decimal>,
    pub holdings: Vec<Holding>,
    pub exposure_total: Decimal,
    pub risk_aggregates: Value,
}

impl PortfolioSnapshot {
    pub fn empty() -> Self {
        Self {
            as_of: Utc::now(),
            cash: HashMap::new(),
            holdings: Vec::new(),
            exposure_total: Decimal::ZERO,
            risk_aggregates: Value::Object(Default::default()),
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        self.holdings.iter().map(|h| h.symbol.clone()).collect()
    }

    pub fn total_exposure(&self) -> Decimal {
        self.holdings.iter().map(|h| h.exposure).sum()
    }

    /// Exposure of one symbol as a fraction of total exposure (0 when flat).
    pub fn exposure_fraction(&self, symbol: &str) -> Decimal {
        let total = self.total_exposure();
        if total.is_zero() {
            return Decimal::ZERO;
        }
        self.holdings
            .iter()
            .filter(|h| h.symbol == symbol)
            .map(|h| h.exposure)
            .sum::<Decimal>()
            / total
    }
}
