use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Operation name the activity log records when a resource group is created
/// (or its properties are written).
pub const OPERATION_RESOURCE_GROUP_WRITE: &str = "Microsoft.Resources/subscriptions/resourceGroups/write";

/// A historical management operation recorded by the activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEvent {
    pub operation_name: String,
    /// Identity that issued the operation (UPN, object id or app id).
    pub caller: Option<String>,
    pub event_timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn is_operation(&self, operation: &str) -> bool {
        self.operation_name.eq_ignore_ascii_case(operation)
    }
}

/// Activity-log search for a single resource over a lookback window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityQuery {
    pub resource_uri: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ActivityQuery {
    /// Search the `lookback` ending at `end`.
    pub fn lookback(resource_uri: impl Into<String>, end: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            resource_uri: resource_uri.into(),
            start: end - lookback,
            end,
        }
    }

    pub fn window(&self) -> Duration {
        self.end - self.start
    }
}
