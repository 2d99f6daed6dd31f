use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Approved,
    Executed,
    Rejected,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "pending",
            IntentStatus::Approved => "approved",
            IntentStatus::Executed => "executed",
            IntentStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(IntentStatus::Pending),
            "approved" => Ok(IntentStatus::Approved),
            "executed" => Ok(IntentStatus::Executed),
            "rejected" => Ok(IntentStatus::Rejected),
            _ => anyhow::bail!("Unknown intent status: {}", s),
        }
    }
}

/// A proposed trade working its way toward execution or rejection.
/// History accumulates on the record (order commands, execution reports);
/// status transitions stamp the matching timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    pub symbol: String,
    pub created_at: DateTime<Utc>,
    pub signal: Option<Value>,
    pub risk_decision: Option<Value>,
    pub order_commands: Vec<Value>,
    pub execution_reports: Vec<Value>,
    pub status: IntentStatus,
    pub approved_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub source: String,
}

impl Intent {
    pub fn new(symbol: impl Into<String>, signal: Option<Value>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            created_at: Utc::now(),
            signal,
            risk_decision: None,
            order_commands: Vec::new(),
            execution_reports: Vec::new(),
            status: IntentStatus::Pending,
            approved_at: None,
            executed_at: None,
            source: source.into(),
        }
    }

    pub fn approve(&mut self, risk_decision: Value) {
        self.status = IntentStatus::Approved;
        self.risk_decision = Some(risk_decision);
        self.approved_at = Some(Utc::now());
    }

    pub fn reject(&mut self, risk_decision: Value) {
        self.status = IntentStatus::Rejected;
        self.risk_decision = Some(risk_decision);
    }

    pub fn mark_executed(&mut self, report: Value) {
        self.status = IntentStatus::Executed;
        self.execution_reports.push(report);
        self.executed_at = Some(Utc::now());
    }
}

/// Query filter for intent listings.
#[derive(Debug, Clone, Default)]
pub struct IntentFilter {
    pub status: Option<IntentStatus>,
    pub symbol: Option<String>,
}
