//! Research query builders for the external provider.
//!
//! Every query instructs the provider to answer with the canonical
//! `{"stocks": {SYMBOL: {...}}}` document; the application-layer parsers
//! reject anything else.

use crate::infrastructure::api::client::ProviderRequest;

fn join(symbols: &[String]) -> String {
    symbols.join(", ")
}

/// Latest news plus most recent earnings for a batch of symbols.
pub fn news_and_earnings(symbols: &[String]) -> ProviderRequest {
    let query = format!(
        "For each of these stocks ({}), provide the latest news and earnings information.\n\n\
         Focus on:\n\
         - Recent news from the last 24 hours (earnings, major announcements, market-moving events)\n\
         - Latest earnings report details (EPS, revenue, guidance)\n\
         - Next earnings date if available\n\
         - Overall sentiment (positive/negative/neutral)\n\n\
         Respond with a JSON object of the form {{\"stocks\": {{SYMBOL: {{\"news\": [...], \"earnings\": {{...}}}}}}}}.",
        join(symbols)
    );
    ProviderRequest {
        query,
        search_recency: "day".to_string(),
        max_tokens: 2000,
    }
}

/// Daily news summary for a batch of symbols.
pub fn daily_news(symbols: &[String]) -> ProviderRequest {
    let query = format!(
        "Provide a comprehensive daily news summary for these stocks: {}\n\n\
         Include major news and events, earnings announcements, price movements, \
         analyst updates, and overall sentiment per stock.\n\n\
         Respond with a JSON object of the form {{\"stocks\": {{SYMBOL: {{\"news\": [...]}}}}}}.",
        join(symbols)
    );
    ProviderRequest {
        query,
        search_recency: "day".to_string(),
        max_tokens: 3000,
    }
}

/// Fundamental ratios for a batch of symbols.
pub fn fundamentals(symbols: &[String]) -> ProviderRequest {
    let query = format!(
        "For each of these stocks ({}), provide comprehensive fundamental analysis data: \
         market capitalization, P/E ratio, P/B ratio, debt-to-equity, ROE, ROA, current ratio, \
         profit margins, revenue growth (YoY), earnings growth (YoY), and dividend yield. \
         Use the most recent available data and numerical values where possible.\n\n\
         Respond with a JSON object of the form {{\"stocks\": {{SYMBOL: {{\"fundamentals\": {{...}}}}}}}}.",
        join(symbols)
    );
    ProviderRequest {
        query,
        search_recency: "week".to_string(),
        max_tokens: 2000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_mention_every_symbol() {
        let symbols = vec!["INFY".to_string(), "TCS".to_string()];
        for req in [
            news_and_earnings(&symbols),
            daily_news(&symbols),
            fundamentals(&symbols),
        ] {
            assert!(req.query.contains("INFY"));
            assert!(req.query.contains("TCS"));
            assert!(req.query.contains("\"stocks\""));
        }
    }

    #[test]
    fn test_recency_filters() {
        let symbols = vec!["INFY".to_string()];
        assert_eq!(news_and_earnings(&symbols).search_recency, "day");
        assert_eq!(fundamentals(&symbols).search_recency, "week");
    }
}
