//! Ownership and lifecycle tagging pass.
//!
//! One pass walks every resource group of every configured subscription:
//! 1. Resolves the owner (tag first, then the activity log)
//! 2. Writes newly discovered owners back as the owner tag
//! 3. Stamps lifecycle deadlines on groups nobody owns
//!
//! Everything staged for a group goes out in a single update call. A group
//! whose update fails is logged and counted; the pass moves on.
//!
//! The pass is idempotent: once tags are written, a second pass over the same
//! groups makes no calls beyond listing and reading.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use futures::{StreamExt, stream};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    clients::{ActivityLogClient, ClientError, ResourceDirectory, cancellable},
    config::{RuntimeConfig, TaggingConfig},
    models::{OWNER_UNKNOWN, OwnerSource, OwnershipRecord, ResourceGroup, TagPatch},
    services::{LifecycleEngine, OwnerResolver},
};

/// Results from a single tagging pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaggingRunResult {
    /// Subscriptions whose groups were listed.
    pub subscriptions: u64,
    /// Subscriptions skipped because listing failed.
    pub subscriptions_skipped: u64,
    pub groups_seen: u64,
    /// Groups already carrying a real owner tag.
    pub already_owned: u64,
    /// Owners found in the activity log this pass.
    pub owners_resolved: u64,
    /// Groups whose owner is unknown, whether tagged so or newly exhausted.
    pub owners_unknown: u64,
    /// Groups with a non-empty patch (sent or, in dry-run mode, only logged).
    pub updates_planned: u64,
    /// Update calls that succeeded.
    pub groups_updated: u64,
    /// Deadline tags written.
    pub deadlines_stamped: u64,
    /// Deadline tags removed from claimed groups.
    pub deadlines_cleared: u64,
    /// Groups left untouched because the activity log could not be read.
    pub lookup_failures: u64,
    /// Failed update calls.
    pub failures: u64,
    /// The pass stopped early because it was cancelled.
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl TaggingRunResult {
    fn absorb(&mut self, other: TaggingRunResult) {
        self.subscriptions += other.subscriptions;
        self.subscriptions_skipped += other.subscriptions_skipped;
        self.groups_seen += other.groups_seen;
        self.already_owned += other.already_owned;
        self.owners_resolved += other.owners_resolved;
        self.owners_unknown += other.owners_unknown;
        self.updates_planned += other.updates_planned;
        self.groups_updated += other.groups_updated;
        self.deadlines_stamped += other.deadlines_stamped;
        self.deadlines_cleared += other.deadlines_cleared;
        self.lookup_failures += other.lookup_failures;
        self.failures += other.failures;
        self.cancelled |= other.cancelled;
    }

    /// Check if the pass changed (or, in dry-run mode, would change) any tags.
    pub fn has_changes(&self) -> bool {
        self.updates_planned > 0
    }
}

pub struct TaggingPass {
    directory: Arc<dyn ResourceDirectory>,
    resolver: OwnerResolver,
    lifecycle: LifecycleEngine,
    subscription_ids: Vec<String>,
    dry_run: bool,
    subscription_concurrency: usize,
    group_concurrency: usize,
}

impl TaggingPass {
    pub fn new(
        directory: Arc<dyn ResourceDirectory>,
        activity: Arc<dyn ActivityLogClient>,
        subscription_ids: Vec<String>,
        tagging: &TaggingConfig,
        runtime: &RuntimeConfig,
    ) -> Self {
        Self {
            resolver: OwnerResolver::new(activity, tagging),
            lifecycle: LifecycleEngine::new(directory.clone(), tagging),
            directory,
            subscription_ids,
            dry_run: tagging.dry_run,
            subscription_concurrency: runtime.subscription_concurrency.max(1),
            group_concurrency: runtime.resource_group_concurrency.max(1),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run one pass over all subscriptions.
    pub async fn run(&self, cancel: &CancellationToken) -> TaggingRunResult {
        let start = Instant::now();
        let dry_run_msg = if self.dry_run { " (DRY RUN)" } else { "" };

        info!(
            subscriptions = self.subscription_ids.len(),
            "Starting tagging pass{}", dry_run_msg
        );

        let partials: Vec<TaggingRunResult> = stream::iter(self.subscription_ids.clone())
            .map(|subscription_id| async move { self.run_subscription(&subscription_id, cancel).await })
            .buffer_unordered(self.subscription_concurrency)
            .collect()
            .await;

        let mut result = TaggingRunResult::default();
        for partial in partials {
            result.absorb(partial);
        }
        result.cancelled |= cancel.is_cancelled();
        result.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            groups = result.groups_seen,
            already_owned = result.already_owned,
            owners_resolved = result.owners_resolved,
            owners_unknown = result.owners_unknown,
            updated = result.groups_updated,
            deadlines_stamped = result.deadlines_stamped,
            lookup_failures = result.lookup_failures,
            failures = result.failures,
            cancelled = result.cancelled,
            duration_ms = result.duration_ms,
            "Tagging pass completed{}",
            dry_run_msg
        );

        result
    }

    async fn run_subscription(
        &self,
        subscription_id: &str,
        cancel: &CancellationToken,
    ) -> TaggingRunResult {
        let mut result = TaggingRunResult::default();

        info!(subscription_id, "Looking for resource groups without an owner tag");

        let groups = match cancellable(cancel, self.directory.list_resource_groups(subscription_id)).await {
            Ok(groups) => groups,
            Err(ClientError::Cancelled) => {
                result.cancelled = true;
                return result;
            }
            Err(e) => {
                warn!(subscription_id, error = %e, "Failed to list resource groups, skipping subscription");
                result.subscriptions_skipped = 1;
                return result;
            }
        };
        result.subscriptions = 1;

        let partials: Vec<TaggingRunResult> = stream::iter(groups)
            .map(|group| async move { self.process_group(subscription_id, &group, cancel).await })
            .buffer_unordered(self.group_concurrency)
            .collect()
            .await;

        for partial in partials {
            result.absorb(partial);
        }
        result
    }

    async fn process_group(
        &self,
        subscription_id: &str,
        group: &ResourceGroup,
        cancel: &CancellationToken,
    ) -> TaggingRunResult {
        let mut result = TaggingRunResult {
            groups_seen: 1,
            ..Default::default()
        };
        if cancel.is_cancelled() {
            result.cancelled = true;
            return result;
        }

        let now = Utc::now();
        let record = self
            .resolver
            .resolve_owner(group, subscription_id, now, cancel)
            .await;

        // A cancelled resolution reports Exhausted; never persist that
        if cancel.is_cancelled() {
            result.cancelled = true;
            return result;
        }

        match (record.source, record.owner.is_unknown()) {
            (OwnerSource::Tag, false) => {
                debug!(
                    subscription_id,
                    resource_group = %group.name,
                    owner = %record.owner,
                    "Resource group already owned"
                );
                result.already_owned = 1;
            }
            (OwnerSource::ActivityLog, _) => result.owners_resolved = 1,
            (OwnerSource::Unresolved, _) => {
                result.lookup_failures = 1;
                return result;
            }
            _ => result.owners_unknown = 1,
        }

        let patch = self.plan_group(group, &record, now);
        if patch.is_empty() {
            return result;
        }

        result.updates_planned = 1;
        let stamped = patch
            .merge
            .keys()
            .filter(|key| !key.eq_ignore_ascii_case(self.resolver.owner_tag()))
            .count() as u64;

        if self.dry_run {
            info!(
                subscription_id,
                resource_group = %group.name,
                set = ?patch.merge,
                remove = ?patch.remove,
                "Dry run: would update resource group tags"
            );
            return result;
        }

        let sent = match record.source {
            OwnerSource::Tag => self
                .lifecycle
                .apply_lifecycle_policy(group, &record, now, cancel)
                .await
                .map(|_| ()),
            _ => cancellable(cancel, self.directory.update_tags(group, &patch)).await,
        };

        match sent {
            Ok(()) => {
                info!(
                    subscription_id,
                    resource_group = %group.name,
                    owner = %record.owner,
                    deadlines = stamped,
                    "Resource group tagged"
                );
                result.groups_updated = 1;
                result.deadlines_stamped = stamped;
                result.deadlines_cleared = patch.remove.len() as u64;
            }
            Err(ClientError::Cancelled) => result.cancelled = true,
            Err(e) => {
                warn!(
                    subscription_id,
                    resource_group = %group.name,
                    transient = e.is_transient(),
                    error = %e,
                    "Failed to update resource group tags"
                );
                result.failures = 1;
            }
        }

        result
    }

    /// Tag changes for one group given its resolved owner.
    ///
    /// A newly found owner only gets the owner tag; lifecycle rules wait for
    /// the next pass. A newly exhausted group gets `owner=unknown` and its
    /// deadlines together. An unresolved group gets nothing.
    pub fn plan_group(
        &self,
        group: &ResourceGroup,
        record: &OwnershipRecord,
        now: chrono::DateTime<Utc>,
    ) -> TagPatch {
        match record.source {
            OwnerSource::Tag => self.lifecycle.plan(group, record, now),
            OwnerSource::ActivityLog => {
                let mut patch = TagPatch::new();
                patch.set(self.resolver.owner_tag(), record.owner.as_str());
                patch
            }
            OwnerSource::Exhausted => {
                let mut patch = TagPatch::new();
                patch.set(self.resolver.owner_tag(), OWNER_UNKNOWN);
                patch.extend(self.lifecycle.plan(group, record, now));
                patch
            }
            OwnerSource::Unresolved => TagPatch::new(),
        }
    }
}

/// Runs tagging passes every `interval` until `cancel` fires.
///
/// The first pass starts immediately. A pass that overruns the interval
/// delays the next one instead of stacking.
pub async fn start_tagging_worker(
    pass: Arc<TaggingPass>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(interval_secs = interval.as_secs(), "Tagging worker started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Tagging worker shutting down");
                break;
            }
            _ = ticker.tick() => {
                let result = pass.run(&cancel).await;
                if result.failures > 0 || result.lookup_failures > 0 {
                    warn!(
                        failures = result.failures,
                        lookup_failures = result.lookup_failures,
                        "Tagging pass finished with failures"
                    );
                }
            }
        }
    }
}
