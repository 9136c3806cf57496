//! Audit record model shared by the logger and the store.

pub mod logger;
pub mod store;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Proxied,
    BlockedTime,
    BlockedFinancial,
    BlockedRateLimit,
    BlockedSensitiveData,
    ServedFromCache,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Proxied => "PROXIED",
            Action::BlockedTime => "BLOCKED_TIME",
            Action::BlockedFinancial => "BLOCKED_FINANCIAL",
            Action::BlockedRateLimit => "BLOCKED_RATE_LIMIT",
            Action::BlockedSensitiveData => "BLOCKED_SENSITIVE_DATA",
            Action::ServedFromCache => "SERVED_FROM_CACHE",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub endpoint_path: String,
    pub action: Action,
    pub anonymized_payload: String,
    pub response_time_ms: Option<i32>,
    pub error_message: Option<String>,
}

impl AuditRecord {
    pub fn new(provider: impl Into<String>, endpoint_path: impl Into<String>, action: Action) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            provider: provider.into(),
            endpoint_path: endpoint_path.into(),
            action,
            anonymized_payload: String::new(),
            response_time_ms: None,
            error_message: None,
        }
    }

}
