//! Owner resolution for resource groups.
//!
//! An owner tag is authoritative. Untagged groups are attributed to whoever
//! created them, as recorded by the activity log. The log is searched in two
//! phases: a short window that covers groups created since the last pass, then
//! a long and much more expensive window. Both end at the same instant.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    clients::{ActivityLogClient, ClientError, cancellable},
    config::TaggingConfig,
    models::{
        ActivityQuery, OPERATION_RESOURCE_GROUP_WRITE, Owner, OwnerSource, OwnershipRecord,
        ResourceGroup, TagMap,
    },
};

/// Owner named by the group's owner tag, if the tag exists.
///
/// The key matches case-insensitively. A tag holding the reserved
/// `unknown` value yields [`Owner::Unknown`].
pub fn tagged_owner(tags: &TagMap, owner_tag: &str) -> Option<Owner> {
    tags.get(owner_tag).map(Owner::from_tag_value)
}

pub struct OwnerResolver {
    activity: Arc<dyn ActivityLogClient>,
    owner_tag: String,
    short_lookback: Duration,
    long_lookback: Duration,
}

impl OwnerResolver {
    pub fn new(activity: Arc<dyn ActivityLogClient>, config: &TaggingConfig) -> Self {
        Self {
            activity,
            owner_tag: config.owner_tag.clone(),
            short_lookback: config.short_lookback(),
            long_lookback: config.long_lookback(),
        }
    }

    pub fn owner_tag(&self) -> &str {
        &self.owner_tag
    }

    /// Determine the owner of `group`. Never fails.
    ///
    /// [`OwnerSource::Exhausted`] means every window was read and none held
    /// a creation event. A failed activity-log query yields
    /// [`OwnerSource::Unresolved`] instead, so an outage is never mistaken
    /// for an orphaned group. If `cancel` fires the result is `Exhausted`;
    /// callers must check the token before persisting it.
    pub async fn resolve_owner(
        &self,
        group: &ResourceGroup,
        subscription_id: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> OwnershipRecord {
        let record = |owner, source| OwnershipRecord {
            subscription_id: subscription_id.to_string(),
            resource_group: group.name.clone(),
            owner,
            source,
        };

        if let Some(owner) = tagged_owner(&group.tags, &self.owner_tag) {
            return record(owner, OwnerSource::Tag);
        }

        for lookback in [self.short_lookback, self.long_lookback] {
            if cancel.is_cancelled() {
                break;
            }
            match self
                .search_window(group, subscription_id, now, lookback, cancel)
                .await
            {
                Ok(Some(owner)) => {
                    debug!(
                        subscription_id,
                        resource_group = %group.name,
                        owner = %owner,
                        lookback_hours = lookback.num_hours(),
                        "Resolved owner from activity log"
                    );
                    return record(owner, OwnerSource::ActivityLog);
                }
                Ok(None) => {}
                Err(ClientError::Cancelled) => break,
                Err(e) => {
                    warn!(
                        subscription_id,
                        resource_group = %group.name,
                        lookback_hours = lookback.num_hours(),
                        transient = e.is_transient(),
                        error = %e,
                        "Activity log query failed, leaving resource group untouched"
                    );
                    return record(Owner::Unknown, OwnerSource::Unresolved);
                }
            }
        }

        debug!(
            subscription_id,
            resource_group = %group.name,
            "No creation event found in any lookback window"
        );
        record(Owner::Unknown, OwnerSource::Exhausted)
    }

    /// Caller of the first creation event in the window ending at `now`.
    ///
    /// Blank callers and the reserved `unknown` value are skipped.
    async fn search_window(
        &self,
        group: &ResourceGroup,
        subscription_id: &str,
        now: DateTime<Utc>,
        lookback: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Owner>, ClientError> {
        let query = ActivityQuery::lookback(&group.id, now, lookback);
        let events = cancellable(cancel, self.activity.list_events(subscription_id, &query)).await?;

        Ok(events
            .into_iter()
            .filter(|e| e.is_operation(OPERATION_RESOURCE_GROUP_WRITE))
            .filter_map(|e| e.caller.as_deref().map(Owner::from_tag_value))
            .find(|owner| !owner.is_unknown()))
    }
}
