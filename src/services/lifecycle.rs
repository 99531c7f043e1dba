//! Lifecycle deadline tags for groups nobody owns.
//!
//! A group whose owner stays unknown gets three deadline tags: deallocate its
//! compute, delete its VMs, delete the group. Each is stamped once, the first
//! time the group is seen without an owner, and never moved afterwards. This
//! engine only writes the dates; acting on them is someone else's job.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    clients::{ClientError, ResourceDirectory, cancellable},
    config::{LifecycleConfig, TaggingConfig},
    models::{OwnerSource, OwnershipRecord, ResourceGroup, TagPatch, format_timestamp},
};

/// Deadline value `offset_days` after `now`.
pub fn deadline_value(now: DateTime<Utc>, offset_days: u32) -> String {
    format_timestamp(now + Duration::days(i64::from(offset_days)))
}

pub struct LifecycleEngine {
    directory: Arc<dyn ResourceDirectory>,
    lifecycle: LifecycleConfig,
    clear_deadlines_on_claim: bool,
}

impl LifecycleEngine {
    pub fn new(directory: Arc<dyn ResourceDirectory>, config: &TaggingConfig) -> Self {
        Self {
            directory,
            lifecycle: config.lifecycle.clone(),
            clear_deadlines_on_claim: config.clear_deadlines_on_claim,
        }
    }

    /// Stage the deadline tags `group` is missing. Pure.
    ///
    /// Unknown owner: every absent deadline tag is set to `now + offset`.
    /// Present ones are left alone. Known owner: nothing, unless clearing on
    /// claim is enabled and the owner came from a tag, in which case any
    /// leftover deadline tags are removed. An unresolved record never gets
    /// a patch.
    pub fn plan(&self, group: &ResourceGroup, record: &OwnershipRecord, now: DateTime<Utc>) -> TagPatch {
        let mut patch = TagPatch::new();

        if record.source == OwnerSource::Unresolved {
            return patch;
        }

        if record.owner.is_unknown() {
            for (_, deadline) in self.lifecycle.iter() {
                if !group.tags.contains_key(&deadline.tag) {
                    patch.set(deadline.tag.clone(), deadline_value(now, deadline.offset_days));
                }
            }
        } else if self.clear_deadlines_on_claim && record.source == OwnerSource::Tag {
            for (_, deadline) in self.lifecycle.iter() {
                if group.tags.contains_key(&deadline.tag) {
                    patch.delete(deadline.tag.clone());
                }
            }
        }

        patch
    }

    /// Plan, then send the patch in one update call if it is not empty.
    ///
    /// Returns whether an update was sent.
    pub async fn apply_lifecycle_policy(
        &self,
        group: &ResourceGroup,
        record: &OwnershipRecord,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<bool, ClientError> {
        let patch = self.plan(group, record, now);
        if patch.is_empty() {
            return Ok(false);
        }

        debug!(
            subscription_id = %record.subscription_id,
            resource_group = %group.name,
            set = patch.merge.len(),
            removed = patch.remove.len(),
            "Applying lifecycle tags"
        );
        cancellable(cancel, self.directory.update_tags(group, &patch)).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        models::{DeadlineKind, Owner},
        test_utils::FakeDirectory,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn record(owner: Owner, source: OwnerSource) -> OwnershipRecord {
        OwnershipRecord {
            subscription_id: "S1".into(),
            resource_group: "rg-d".into(),
            owner,
            source,
        }
    }

    fn unknown() -> OwnershipRecord {
        record(Owner::Unknown, OwnerSource::Exhausted)
    }

    fn engine_with(directory: Arc<FakeDirectory>, config: &TaggingConfig) -> LifecycleEngine {
        LifecycleEngine::new(directory, config)
    }

    fn engine() -> LifecycleEngine {
        engine_with(Arc::new(FakeDirectory::new()), &TaggingConfig::default())
    }

    #[test]
    fn test_unknown_owner_gets_all_three_deadlines() {
        let group = ResourceGroup::new("S1", "rg-d");
        let patch = engine().plan(&group, &unknown(), now());

        assert_eq!(patch.merge.len(), 3);
        assert_eq!(patch.merge["deallocate"], "2024-01-08T00:00:00.000Z");
        assert_eq!(patch.merge["delete-vm"], "2024-01-15T00:00:00.000Z");
        assert_eq!(patch.merge["delete-rg"], "2024-01-31T00:00:00.000Z");
        assert!(patch.remove.is_empty());
    }

    #[test]
    fn test_deadlines_escalate() {
        let group = ResourceGroup::new("S1", "rg-d");
        let patch = engine().plan(&group, &unknown(), now());

        let at = |kind: DeadlineKind| {
            let value = &patch.merge[kind.default_tag()];
            DateTime::parse_from_rfc3339(value).unwrap()
        };
        assert!(at(DeadlineKind::Deallocate) <= at(DeadlineKind::DeleteVm));
        assert!(at(DeadlineKind::DeleteVm) <= at(DeadlineKind::DeleteRg));
    }

    #[test]
    fn test_existing_deadlines_never_move() {
        let group = ResourceGroup::new("S1", "rg-d")
            .with_tag("Deallocate", "2023-12-01T00:00:00.000Z")
            .with_tag("delete-vm", "2023-12-08T00:00:00.000Z");

        let later = now() + Duration::days(3);
        let patch = engine().plan(&group, &record(Owner::Unknown, OwnerSource::Tag), later);

        assert_eq!(patch.merge.len(), 1);
        assert_eq!(patch.merge["delete-rg"], "2024-02-03T00:00:00.000Z");
    }

    #[test]
    fn test_second_plan_is_empty() {
        let mut group = ResourceGroup::new("S1", "rg-d");
        let engine = engine();

        let first = engine.plan(&group, &unknown(), now());
        group.tags.apply(&first);
        let second = engine.plan(&group, &unknown(), now() + Duration::hours(1));

        assert!(second.is_empty());
    }

    #[test]
    fn test_unresolved_owner_gets_no_deadlines() {
        let group = ResourceGroup::new("S1", "rg-d");
        let patch = engine().plan(&group, &record(Owner::Unknown, OwnerSource::Unresolved), now());
        assert!(patch.is_empty());
    }

    #[test]
    fn test_known_owner_untouched() {
        let group = ResourceGroup::new("S1", "rg-a")
            .with_tag("owner", "alice")
            .with_tag("deallocate", "2023-12-01T00:00:00.000Z");

        let patch = engine().plan(
            &group,
            &record(Owner::Known("alice".into()), OwnerSource::Tag),
            now(),
        );
        assert!(patch.is_empty());
    }

    #[test]
    fn test_claimed_group_sheds_deadlines_when_enabled() {
        let config = TaggingConfig {
            clear_deadlines_on_claim: true,
            ..Default::default()
        };
        let engine = engine_with(Arc::new(FakeDirectory::new()), &config);
        let group = ResourceGroup::new("S1", "rg-a")
            .with_tag("owner", "alice")
            .with_tag("deallocate", "2023-12-01T00:00:00.000Z")
            .with_tag("DELETE-RG", "2023-12-24T00:00:00.000Z");

        let patch = engine.plan(
            &group,
            &record(Owner::Known("alice".into()), OwnerSource::Tag),
            now(),
        );

        assert!(patch.merge.is_empty());
        assert_eq!(
            patch.remove.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["deallocate", "delete-rg"]
        );
    }

    #[tokio::test]
    async fn test_apply_sends_one_update() {
        let directory = Arc::new(FakeDirectory::new());
        let engine = engine_with(directory.clone(), &TaggingConfig::default());
        let group = ResourceGroup::new("S1", "rg-d");

        let sent = engine
            .apply_lifecycle_policy(&group, &unknown(), now(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(sent);
        assert_eq!(directory.update_count(), 1);
        assert_eq!(directory.patch_for("rg-d").unwrap().merge.len(), 3);
    }

    #[tokio::test]
    async fn test_apply_skips_empty_patch() {
        let directory = Arc::new(FakeDirectory::new());
        let engine = engine_with(directory.clone(), &TaggingConfig::default());
        let group = ResourceGroup::new("S1", "rg-a").with_tag("owner", "alice");

        let sent = engine
            .apply_lifecycle_policy(
                &group,
                &record(Owner::Known("alice".into()), OwnerSource::Tag),
                now(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!sent);
        assert_eq!(directory.update_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_propagates_update_failure() {
        let directory = Arc::new(FakeDirectory::new().failing_update("rg-d"));
        let engine = engine_with(directory, &TaggingConfig::default());
        let group = ResourceGroup::new("S1", "rg-d");

        let result = engine
            .apply_lifecycle_policy(&group, &unknown(), now(), &CancellationToken::new())
            .await;
        assert!(result.is_err());
    }
}
