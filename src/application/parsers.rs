//! Provider payload parsing.
//!
//! The provider is asked for exactly one document shape,
//! `{"stocks": {SYMBOL: {...}}}`; anything else fails parsing with a
//! non-retryable error instead of being guessed at.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::analysis::FundamentalAnalysis;
use crate::domain::errors::TaskError;
use crate::domain::research::{EarningsReport, NewsItem};

/// Extract the canonical per-symbol map from a provider payload.
pub fn stocks_map(payload: &Value) -> Result<&Map<String, Value>, TaskError> {
    payload
        .get("stocks")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            TaskError::Fatal("provider payload missing top-level \"stocks\" object".to_string())
        })
}

fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn parse_date(value: Option<&Value>) -> Option<NaiveDate> {
    value
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}

fn sentiment_of(value: Option<&Value>) -> String {
    match value.and_then(Value::as_str) {
        Some("positive") => "positive".to_string(),
        Some("negative") => "negative".to_string(),
        _ => "neutral".to_string(),
    }
}

/// News articles under `entry["news"]`. Articles without a title are
/// dropped.
pub fn parse_news(symbol: &str, entry: &Value) -> Vec<NewsItem> {
    let Some(articles) = entry.get("news").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for article in articles {
        let Some(title) = article.get("title").and_then(Value::as_str) else {
            debug!("Dropping news article without title for {}", symbol);
            continue;
        };
        let summary = article
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or(title);

        let mut item = NewsItem::new(symbol, title, summary);
        item.content = article
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string);
        item.source = article
            .get("source")
            .and_then(Value::as_str)
            .map(str::to_string);
        item.sentiment = sentiment_of(article.get("sentiment"));
        if let Some(score) = article.get("relevance_score").and_then(Value::as_f64) {
            item.relevance_score = score.clamp(0.0, 1.0);
        }
        item.published_at = parse_timestamp(article.get("published_at"));
        item.citations = article
            .get("citations")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        items.push(item);
    }
    items
}

/// Latest earnings report under `entry["earnings"]`. Requires a fiscal
/// period and a report date to key the row.
pub fn parse_earnings(symbol: &str, entry: &Value) -> Option<EarningsReport> {
    let earnings = entry.get("earnings")?.as_object()?;

    let fiscal_period = earnings.get("fiscal_period")?.as_str()?;
    let report_date = parse_date(earnings.get("report_date"))?;

    let mut report = EarningsReport::new(symbol, fiscal_period, report_date);
    report.fiscal_year = earnings.get("fiscal_year").and_then(Value::as_i64);
    report.fiscal_quarter = earnings.get("fiscal_quarter").and_then(Value::as_i64);
    report.eps_actual = earnings.get("eps_actual").and_then(Value::as_f64);
    report.eps_estimated = earnings.get("eps_estimated").and_then(Value::as_f64);
    report.revenue_actual = earnings.get("revenue_actual").and_then(Value::as_f64);
    report.revenue_estimated = earnings.get("revenue_estimated").and_then(Value::as_f64);
    report.surprise_pct = earnings.get("surprise_pct").and_then(Value::as_f64);
    report.guidance = earnings
        .get("guidance")
        .and_then(Value::as_str)
        .map(str::to_string);
    report.next_earnings_date = parse_date(earnings.get("next_earnings_date"));
    Some(report)
}

/// Fundamental ratios under `entry["fundamentals"]`.
pub fn parse_fundamentals(
    symbol: &str,
    entry: &Value,
    analysis_date: NaiveDate,
) -> Option<FundamentalAnalysis> {
    let fundamentals = entry.get("fundamentals")?.as_object()?;

    let mut analysis = FundamentalAnalysis::new(symbol, analysis_date);
    analysis.pe_ratio = fundamentals.get("pe_ratio").and_then(Value::as_f64);
    analysis.pb_ratio = fundamentals.get("pb_ratio").and_then(Value::as_f64);
    analysis.roe = fundamentals.get("roe").and_then(Value::as_f64);
    analysis.roa = fundamentals.get("roa").and_then(Value::as_f64);
    analysis.debt_to_equity = fundamentals.get("debt_to_equity").and_then(Value::as_f64);
    analysis.current_ratio = fundamentals.get("current_ratio").and_then(Value::as_f64);
    analysis.profit_margins = fundamentals.get("profit_margins").and_then(Value::as_f64);
    analysis.revenue_growth = fundamentals.get("revenue_growth").and_then(Value::as_f64);
    analysis.earnings_growth = fundamentals.get("earnings_growth").and_then(Value::as_f64);
    analysis.dividend_yield = fundamentals.get("dividend_yield").and_then(Value::as_f64);
    analysis.market_cap = fundamentals.get("market_cap").and_then(Value::as_f64);
    analysis.sector_pe = fundamentals.get("sector_pe").and_then(Value::as_f64);
    analysis.industry_rank = fundamentals.get("industry_rank").and_then(Value::as_i64);
    analysis.analysis_data = Value::Object(fundamentals.clone());

    analysis.overall_score = Some(analysis.compute_overall_score());
    Some(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_non_canonical_shape_is_rejected() {
        for payload in [
            json!({"articles": []}),
            json!({"stocks": ["INFY"]}),
            json!([1, 2, 3]),
            json!("plain text"),
        ] {
            let err = stocks_map(&payload).unwrap_err();
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_parse_news_items() {
        let entry = json!({
            "news": [
                {
                    "title": "Infosys wins large deal",
                    "summary": "Multi-year contract signed",
                    "sentiment": "positive",
                    "relevance_score": 0.9,
                    "published_at": "2025-07-01T10:00:00Z",
                    "citations": ["https://example.com/a"]
                },
                {"summary": "no title, dropped"}
            ]
        });

        let items = parse_news("INFY", &entry);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].symbol, "INFY");
        assert_eq!(items[0].sentiment, "positive");
        assert_eq!(items[0].citations.len(), 1);
    }

    #[test]
    fn test_parse_earnings_requires_period_and_date() {
        let complete = json!({
            "earnings": {
                "fiscal_period": "Q1-FY26",
                "report_date": "2025-07-18",
                "eps_actual": 19.7,
                "eps_estimated": 18.9,
                "next_earnings_date": "2025-10-15"
            }
        });
        let report = parse_earnings("INFY", &complete).unwrap();
        assert_eq!(report.fiscal_period, "Q1-FY26");
        assert_eq!(report.eps_actual, Some(19.7));
        assert!(report.next_earnings_date.is_some());

        let missing_date = json!({"earnings": {"fiscal_period": "Q1-FY26"}});
        assert!(parse_earnings("INFY", &missing_date).is_none());
    }

    #[test]
    fn test_parse_fundamentals_scores() {
        let entry = json!({
            "fundamentals": {
                "pe_ratio": 24.1,
                "roe": 31.0,
                "revenue_growth": 8.0,
                "debt_to_equity": 0.1
            }
        });
        let date = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        let analysis = parse_fundamentals("INFY", &entry, date).unwrap();
        assert_eq!(analysis.pe_ratio, Some(24.1));
        assert!(analysis.overall_score.unwrap() > 50.0);
    }
}
