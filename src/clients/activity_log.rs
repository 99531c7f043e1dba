//! Activity log (management events) search.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{ActivityLogClient, ArmClient, ClientResult};
use crate::models::{ActivityEvent, ActivityQuery, format_timestamp};

const ACTIVITY_LOG_API_VERSION: &str = "2015-04-01";

#[derive(Debug, Deserialize)]
struct LocalizableString {
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventData {
    #[serde(default)]
    operation_name: Option<LocalizableString>,
    #[serde(default)]
    caller: Option<String>,
    #[serde(default)]
    event_timestamp: Option<DateTime<Utc>>,
}

impl EventData {
    fn into_event(self) -> Option<ActivityEvent> {
        Some(ActivityEvent {
            operation_name: self.operation_name?.value,
            caller: self.caller.filter(|c| !c.trim().is_empty()),
            event_timestamp: self.event_timestamp?,
        })
    }
}

/// OData filter selecting one resource's events within the query window.
fn event_filter(query: &ActivityQuery) -> String {
    format!(
        "eventTimestamp ge '{}' and eventTimestamp le '{}' and resourceUri eq '{}'",
        format_timestamp(query.start),
        format_timestamp(query.end),
        query.resource_uri
    )
}

#[async_trait]
impl ActivityLogClient for ArmClient {
    async fn list_events(
        &self,
        subscription_id: &str,
        query: &ActivityQuery,
    ) -> ClientResult<Vec<ActivityEvent>> {
        let url = self.url(&format!(
            "/subscriptions/{subscription_id}/providers/Microsoft.Insights/eventtypes/management/values"
        ));
        let filter = event_filter(query);
        let params = [
            ("api-version", ACTIVITY_LOG_API_VERSION),
            ("$filter", filter.as_str()),
        ];

        let raw: Vec<EventData> = self
            .get_all_pages("list_activity_events", || {
                self.http().get(&url).query(&params)
            })
            .await?;

        Ok(raw.into_iter().filter_map(EventData::into_event).collect())
    }
}
