use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Closed set of event types flowing over the in-process bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskSubmitted,
    TaskCompleted,
    ExecutionFailed,
    NewsFetched,
    EarningsFetched,
    FundamentalsUpdated,
    RecommendationCreated,
    PortfolioUpdated,
    IntentUpdated,
    BackupCompleted,
    CircuitOpened,
}

/// An immutable fact published on the bus. Handlers must treat the payload
/// as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub data: Value,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            source: source.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_construction() {
        let event = Event::new(
            EventType::NewsFetched,
            "news_handler",
            json!({"symbol": "TCS", "items": 3}),
        );
        assert_eq!(event.event_type, EventType::NewsFetched);
        assert_eq!(event.source, "news_handler");
        assert_eq!(event.data["items"], 3);
        assert!(!event.id.is_empty());
    }

    #[test]
    fn test_event_type_wire_names() {
        let v = serde_json::to_value(EventType::ExecutionFailed).unwrap();
        assert_eq!(v, "execution_failed");
    }
}
