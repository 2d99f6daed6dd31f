use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecommendationType {
    Buy,
    Hold,
    Sell,
}

impl RecommendationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationType::Buy => "BUY",
            RecommendationType::Hold => "HOLD",
            RecommendationType::Sell => "SELL",
        }
    }
}

impl fmt::Display for RecommendationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecommendationType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(RecommendationType::Buy),
            "HOLD" => Ok(RecommendationType::Hold),
            "SELL" => Ok(RecommendationType::Sell),
            _ => anyhow::bail!("Unknown recommendation type: {}", s),
        }
    }
}

/// BUY/HOLD/SELL output of an analysis run, with targets and the reasoning
/// that produced it. `outcome`/`actual_return` are filled in later when the
/// recommendation is evaluated against what the market did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Option<i64>,
    pub symbol: String,
    pub recommendation_type: RecommendationType,
    pub confidence_score: f64,
    pub target_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub quantity: Option<i64>,
    pub reasoning: String,
    pub analysis_type: String,
    pub time_horizon: String,
    pub risk_level: String,
    pub potential_impact: Option<String>,
    #[serde(default)]
    pub alternative_suggestions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub outcome: Option<String>,
    pub actual_return: Option<f64>,
}

impl Recommendation {
    pub fn new(
        symbol: impl Into<String>,
        recommendation_type: RecommendationType,
        confidence_score: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            symbol: symbol.into(),
            recommendation_type,
            confidence_score,
            target_price: None,
            stop_loss: None,
            quantity: None,
            reasoning: reasoning.into(),
            analysis_type: "fundamental".to_string(),
            time_horizon: "medium".to_string(),
            risk_level: "medium".to_string(),
            potential_impact: None,
            alternative_suggestions: Vec::new(),
            created_at: Utc::now(),
            executed_at: None,
            outcome: None,
            actual_return: None,
        }
    }
}

/// Fundamental ratios for one symbol on one analysis date.
/// Unique per `(symbol, analysis_date)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundamentalAnalysis {
    pub id: Option<i64>,
    pub symbol: String,
    pub analysis_date: NaiveDate,
    pub pe_ratio: Option<f64>,
    pub pb_ratio: Option<f64>,
    pub roe: Option<f64>,
    pub roa: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,
    pub profit_margins: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub earnings_growth: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub market_cap: Option<f64>,
    pub sector_pe: Option<f64>,
    pub industry_rank: Option<i64>,
    pub overall_score: Option<f64>,
    pub recommendation: Option<String>,
    pub analysis_data: Value,
}

impl FundamentalAnalysis {
    pub fn new(symbol: impl Into<String>, analysis_date: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            analysis_date,
            analysis_data: Value::Object(Default::default()),
            ..Default::default()
        }
    }

    /// Placeholder composite score: blends the quality ratios that are
    /// present into a 0..=100 figure. Missing inputs simply don't contribute.
    pub fn compute_overall_score(&self) -> f64 {
        let mut score = 50.0;
        if let Some(roe) = self.roe {
            score += (roe - 10.0).clamp(-15.0, 15.0);
        }
        if let Some(growth) = self.revenue_growth {
            score += (growth / 2.0).clamp(-10.0, 10.0);
        }
        if let Some(de) = self.debt_to_equity {
            score -= (de * 10.0).clamp(0.0, 15.0);
        }
        if let Some(pe) = self.pe_ratio {
            if pe > 40.0 {
                score -= 10.0;
            } else if pe > 0.0 && pe < 15.0 {
                score += 5.0;
            }
        }
        score.clamp(0.0, 100.0)
    }
}
