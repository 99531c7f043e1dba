//! Cost attribution per owner and per resource group.
//!
//! Each subscription is folded independently into a [`SubscriptionCosts`]
//! partial; the partials are merged into one [`CostSummary`]. A run carries a
//! single currency and fails as a whole if two rows disagree.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use futures::{StreamExt, TryStreamExt, stream};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::owner_resolver::tagged_owner;
use crate::{
    clients::{ClientError, CostQueryClient, ResourceDirectory, cancellable},
    models::{ColumnLayout, CostPage, CostQuery, GroupKey, Owner, Period},
};

/// Errors that abort an aggregation run.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error(
        "currency conflict in subscription {subscription_id}: expected {expected}, found {found}"
    )]
    CurrencyConflict {
        expected: String,
        found: String,
        subscription_id: String,
    },

    #[error("cost aggregation cancelled")]
    Cancelled,
}

/// Cost attributed to one resource group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupCost {
    pub owner: Owner,
    pub cost: Decimal,
}

/// Result of folding one subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionCosts {
    pub subscription_id: String,
    pub currency: Option<String>,
    pub per_owner: HashMap<Owner, Decimal>,
    pub per_group: HashMap<GroupKey, GroupCost>,
    pub pages: u32,
    /// Pages dropped because their schema lacked a required column.
    pub skipped_pages: u32,
    /// False when pagination stopped early (fetch failure or page cap).
    pub complete: bool,
}

/// Totals for a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    pub period: Period,
    /// `None` when no row matched any group.
    pub currency: Option<String>,
    pub per_owner: HashMap<Owner, Decimal>,
    pub per_group: HashMap<GroupKey, GroupCost>,
    /// Subscriptions whose resource groups could not be listed.
    pub skipped_subscriptions: Vec<String>,
    /// Subscriptions whose cost pages stopped early.
    pub incomplete_subscriptions: Vec<String>,
}

impl CostSummary {
    fn empty(period: Period) -> Self {
        Self {
            period,
            currency: None,
            per_owner: HashMap::new(),
            per_group: HashMap::new(),
            skipped_subscriptions: Vec::new(),
            incomplete_subscriptions: Vec::new(),
        }
    }

    /// Fold a subscription partial into the totals.
    pub fn merge(&mut self, partial: SubscriptionCosts) -> Result<(), AggregateError> {
        if let Some(found) = &partial.currency {
            match &self.currency {
                Some(expected) if expected != found => {
                    return Err(AggregateError::CurrencyConflict {
                        expected: expected.clone(),
                        found: found.clone(),
                        subscription_id: partial.subscription_id,
                    });
                }
                Some(_) => {}
                None => self.currency = Some(found.clone()),
            }
        }

        for (owner, cost) in partial.per_owner {
            *self.per_owner.entry(owner).or_default() += cost;
        }
        self.per_group.extend(partial.per_group);
        if !partial.complete {
            self.incomplete_subscriptions.push(partial.subscription_id);
        }
        Ok(())
    }

    /// Sum over every group. Equals the sum over every owner.
    pub fn total(&self) -> Decimal {
        self.per_group.values().map(|g| g.cost).sum()
    }
}

pub struct CostAggregator {
    costs: Arc<dyn CostQueryClient>,
    directory: Arc<dyn ResourceDirectory>,
    owner_tag: String,
    max_pages: u32,
    concurrency: usize,
}

impl CostAggregator {
    pub fn new(
        costs: Arc<dyn CostQueryClient>,
        directory: Arc<dyn ResourceDirectory>,
        owner_tag: impl Into<String>,
    ) -> Self {
        Self {
            costs,
            directory,
            owner_tag: owner_tag.into(),
            max_pages: 1000,
            concurrency: 4,
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Attribute the cost of `period` across all subscriptions.
    pub async fn aggregate(
        &self,
        subscription_ids: &[String],
        period: Period,
        cancel: &CancellationToken,
    ) -> Result<CostSummary, AggregateError> {
        let query = CostQuery::daily_cost_by_resource_group(period);
        // Dedup so a subscription listed twice is not counted twice
        let unique: BTreeSet<String> = subscription_ids.iter().cloned().collect();

        let partials: Vec<(String, Option<SubscriptionCosts>)> = stream::iter(unique)
            .map(|id| {
                let query = &query;
                async move {
                    let partial = self.aggregate_subscription(&id, query, cancel).await?;
                    Ok::<_, AggregateError>((id, partial))
                }
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let mut summary = CostSummary::empty(period);
        let mut partials = partials;
        partials.sort_by(|a, b| a.0.cmp(&b.0));

        for (subscription_id, partial) in partials {
            match partial {
                Some(partial) => summary.merge(partial)?,
                None => summary.skipped_subscriptions.push(subscription_id),
            }
        }

        info!(
            subscriptions = subscription_ids.len(),
            skipped = summary.skipped_subscriptions.len(),
            groups = summary.per_group.len(),
            owners = summary.per_owner.len(),
            currency = summary.currency.as_deref().unwrap_or("-"),
            total = %summary.total(),
            "Cost aggregation finished"
        );

        Ok(summary)
    }

    /// Fold all cost pages of one subscription.
    ///
    /// `Ok(None)` means the subscription was skipped because its groups could
    /// not be listed.
    pub async fn aggregate_subscription(
        &self,
        subscription_id: &str,
        query: &CostQuery,
        cancel: &CancellationToken,
    ) -> Result<Option<SubscriptionCosts>, AggregateError> {
        let groups = match cancellable(cancel, self.directory.list_resource_groups(subscription_id)).await {
            Ok(groups) => groups,
            Err(ClientError::Cancelled) => return Err(AggregateError::Cancelled),
            Err(e) => {
                warn!(subscription_id, error = %e, "Failed to list resource groups, skipping subscription");
                return Ok(None);
            }
        };

        let mut partial = SubscriptionCosts {
            subscription_id: subscription_id.to_string(),
            complete: true,
            ..Default::default()
        };

        // Every group starts at zero, so groups without usage still appear
        let mut lookup: HashMap<String, (GroupKey, Owner)> = HashMap::with_capacity(groups.len());
        for group in &groups {
            let owner = tagged_owner(&group.tags, &self.owner_tag).unwrap_or(Owner::Unknown);
            let key = GroupKey::new(subscription_id, group.name.clone());

            partial.per_owner.entry(owner.clone()).or_default();
            partial.per_group.insert(
                key.clone(),
                GroupCost {
                    owner: owner.clone(),
                    cost: Decimal::ZERO,
                },
            );
            lookup.insert(group.name.to_lowercase(), (key, owner));
        }

        let mut continuation: Option<String> = None;
        loop {
            if partial.pages >= self.max_pages {
                warn!(
                    subscription_id,
                    max_pages = self.max_pages,
                    "Cost page limit reached, remaining pages ignored"
                );
                partial.complete = false;
                break;
            }

            let fetch = self.costs.query(subscription_id, query, continuation.as_deref());
            let page = match cancellable(cancel, fetch).await {
                Ok(page) => page,
                Err(ClientError::Cancelled) => return Err(AggregateError::Cancelled),
                Err(e) => {
                    warn!(
                        subscription_id,
                        page = partial.pages + 1,
                        error = %e,
                        "Cost page fetch failed, keeping pages folded so far"
                    );
                    partial.complete = false;
                    break;
                }
            };
            partial.pages += 1;

            fold_page(&mut partial, &page, &lookup)?;

            match page.next_link {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        debug!(
            subscription_id,
            groups = groups.len(),
            pages = partial.pages,
            skipped_pages = partial.skipped_pages,
            complete = partial.complete,
            "Subscription costs folded"
        );

        Ok(Some(partial))
    }
}

/// Add the rows of one page to the partial.
fn fold_page(
    partial: &mut SubscriptionCosts,
    page: &CostPage,
    lookup: &HashMap<String, (GroupKey, Owner)>,
) -> Result<(), AggregateError> {
    let layout = match ColumnLayout::locate(&page.columns) {
        Ok(layout) => layout,
        Err(e) => {
            warn!(
                subscription_id = %partial.subscription_id,
                page = partial.pages,
                error = %e,
                "Skipping cost page with unexpected schema"
            );
            partial.skipped_pages += 1;
            return Ok(());
        }
    };

    for raw in &page.rows {
        let Some(row) = layout.read(raw) else {
            debug!(subscription_id = %partial.subscription_id, "Skipping unreadable cost row");
            continue;
        };
        let Some((key, owner)) = lookup.get(&row.resource_group.to_lowercase()) else {
            continue;
        };

        match &partial.currency {
            Some(expected) if expected != row.currency => {
                return Err(AggregateError::CurrencyConflict {
                    expected: expected.clone(),
                    found: row.currency.to_string(),
                    subscription_id: partial.subscription_id.clone(),
                });
            }
            Some(_) => {}
            None => partial.currency = Some(row.currency.to_string()),
        }

        *partial.per_owner.entry(owner.clone()).or_default() += row.amount;
        if let Some(group) = partial.per_group.get_mut(key) {
            group.cost += row.amount;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rust_decimal::dec;
    use serde_json::json;

    use super::*;
    use crate::{
        models::{CostColumn, ResourceGroup},
        test_utils::{FakeCostClient, FakeDirectory, cost_page, cost_row, server_error},
    };

    fn period() -> Period {
        Period::trailing_days(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(), 30)
    }

    fn aggregator(costs: FakeCostClient, directory: FakeDirectory) -> CostAggregator {
        CostAggregator::new(Arc::new(costs), Arc::new(directory), "owner")
    }

    fn alice() -> Owner {
        Owner::Known("alice".into())
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn s1_directory() -> FakeDirectory {
        FakeDirectory::new().with_groups(
            "S1",
            vec![
                ResourceGroup::new("S1", "rg-a").with_tag("Owner", "alice"),
                ResourceGroup::new("S1", "rg-b"),
            ],
        )
    }

    #[tokio::test]
    async fn test_owner_and_group_breakdown() {
        let costs = FakeCostClient::new().with_pages(
            "S1",
            vec![Ok(cost_page(vec![
                cost_row(json!(12.50), "rg-a", "USD"),
                cost_row(json!(7.25), "rg-b", "USD"),
                cost_row(json!(2.00), "rg-a", "USD"),
            ]))],
        );

        let summary = aggregator(costs, s1_directory())
            .aggregate(&ids(&["S1"]), period(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.currency.as_deref(), Some("USD"));
        assert_eq!(summary.per_owner.len(), 2);
        assert_eq!(summary.per_owner[&alice()], dec!(14.50));
        assert_eq!(summary.per_owner[&Owner::Unknown], dec!(7.25));
        assert_eq!(summary.per_group.len(), 2);
        assert_eq!(summary.per_group[&GroupKey::new("S1", "rg-a")].cost, dec!(14.50));
        assert_eq!(summary.per_group[&GroupKey::new("S1", "rg-b")].cost, dec!(7.25));
    }

    #[tokio::test]
    async fn test_attributes_rows_across_pages() {
        let costs = FakeCostClient::new().with_pages(
            "S1",
            vec![
                Ok(cost_page(vec![
                    cost_row(json!(10.0), "RG-A", "USD"),
                    cost_row(json!(2.5), "rg-b", "USD"),
                ])),
                Ok(cost_page(vec![cost_row(json!(5.0), "rg-a", "USD")])),
            ],
        );
        let aggregator = aggregator(costs, s1_directory());

        let summary = aggregator
            .aggregate(&ids(&["S1"]), period(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.currency.as_deref(), Some("USD"));
        assert_eq!(summary.per_owner[&alice()], dec!(15.0));
        assert_eq!(summary.per_owner[&Owner::Unknown], dec!(2.5));
        assert_eq!(summary.per_group[&GroupKey::new("S1", "rg-a")].cost, dec!(15.0));
        assert_eq!(summary.per_group[&GroupKey::new("S1", "rg-a")].owner, alice());
        assert_eq!(summary.per_group[&GroupKey::new("S1", "rg-b")].cost, dec!(2.5));
        assert!(summary.incomplete_subscriptions.is_empty());
    }

    #[tokio::test]
    async fn test_groups_without_rows_appear_at_zero() {
        let directory = FakeDirectory::new().with_groups(
            "S1",
            vec![
                ResourceGroup::new("S1", "rg-idle").with_tag("owner", "zoe"),
                ResourceGroup::new("S1", "rg-busy"),
            ],
        );
        let costs = FakeCostClient::new().with_pages(
            "S1",
            vec![Ok(cost_page(vec![
                cost_row(json!(1), "rg-busy", "EUR"),
                cost_row(json!(99), "rg-deleted", "EUR"),
            ]))],
        );

        let summary = aggregator(costs, directory)
            .aggregate(&ids(&["S1"]), period(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.per_group.len(), 2);
        assert_eq!(summary.per_group[&GroupKey::new("S1", "rg-idle")].cost, Decimal::ZERO);
        assert_eq!(summary.per_owner[&Owner::Known("zoe".into())], Decimal::ZERO);
        // Unmatched rows are dropped
        assert_eq!(summary.total(), dec!(1));
    }

    #[tokio::test]
    async fn test_owner_and_group_totals_agree() {
        let directory = s1_directory().with_groups(
            "S2",
            vec![
                ResourceGroup::new("S2", "rg-a").with_tag("owner", "alice"),
                ResourceGroup::new("S2", "shared"),
            ],
        );
        let costs = FakeCostClient::new()
            .with_pages(
                "S1",
                vec![Ok(cost_page(vec![
                    cost_row(json!(1.25), "rg-a", "USD"),
                    cost_row(json!("3.5"), "rg-b", "USD"),
                ]))],
            )
            .with_pages(
                "S2",
                vec![Ok(cost_page(vec![
                    cost_row(json!(4), "rg-a", "USD"),
                    cost_row(json!(1e-2), "shared", "USD"),
                ]))],
            );

        let summary = aggregator(costs, directory)
            .aggregate(&ids(&["S1", "S2"]), period(), &CancellationToken::new())
            .await
            .unwrap();

        let by_owner: Decimal = summary.per_owner.values().copied().sum();
        assert_eq!(by_owner, summary.total());
        assert_eq!(summary.total(), dec!(8.76));
        assert_eq!(summary.per_owner[&alice()], dec!(5.25));
        assert_eq!(summary.per_group.len(), 4);
    }

    #[tokio::test]
    async fn test_currency_conflict_within_subscription_fails_run() {
        let costs = FakeCostClient::new().with_pages(
            "S1",
            vec![Ok(cost_page(vec![
                cost_row(json!(1), "rg-a", "USD"),
                cost_row(json!(1), "rg-b", "EUR"),
            ]))],
        );

        let err = aggregator(costs, s1_directory())
            .aggregate(&ids(&["S1"]), period(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            AggregateError::CurrencyConflict {
                expected,
                found,
                subscription_id,
            } => {
                assert_eq!(expected, "USD");
                assert_eq!(found, "EUR");
                assert_eq!(subscription_id, "S1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_currency_conflict_across_subscriptions_fails_run() {
        let directory = s1_directory()
            .with_groups("S2", vec![ResourceGroup::new("S2", "rg-x")]);
        let costs = FakeCostClient::new()
            .with_pages("S1", vec![Ok(cost_page(vec![cost_row(json!(1), "rg-a", "USD")]))])
            .with_pages("S2", vec![Ok(cost_page(vec![cost_row(json!(1), "rg-x", "GBP")]))]);

        let result = aggregator(costs, directory)
            .aggregate(&ids(&["S1", "S2"]), period(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(AggregateError::CurrencyConflict { .. })));
    }

    #[tokio::test]
    async fn test_unmatched_rows_do_not_fix_currency() {
        let costs = FakeCostClient::new().with_pages(
            "S1",
            vec![Ok(cost_page(vec![
                cost_row(json!(7), "gone", "EUR"),
                cost_row(json!(1), "rg-a", "USD"),
            ]))],
        );

        let summary = aggregator(costs, s1_directory())
            .aggregate(&ids(&["S1"]), period(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.currency.as_deref(), Some("USD"));
    }

    #[tokio::test]
    async fn test_currency_codes_compare_exactly() {
        let costs = FakeCostClient::new().with_pages(
            "S1",
            vec![Ok(cost_page(vec![
                cost_row(json!(1), "rg-a", "USD"),
                cost_row(json!(1), "rg-b", "usd"),
            ]))],
        );

        let result = aggregator(costs, s1_directory())
            .aggregate(&ids(&["S1"]), period(), &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(AggregateError::CurrencyConflict { ref found, .. }) if found == "usd"
        ));
    }

    #[tokio::test]
    async fn test_columns_located_per_page() {
        let column = |name: &str| CostColumn {
            name: name.to_string(),
            kind: None,
        };
        let reordered = CostPage {
            columns: vec![
                column("Currency"),
                column("ResourceGroup"),
                column("UsageDate"),
                column("PreTaxCost"),
            ],
            rows: vec![vec![json!("USD"), json!("rg-b"), json!(20240102), json!(4.5)]],
            next_link: None,
        };
        let costs = FakeCostClient::new().with_pages(
            "S1",
            vec![
                Ok(cost_page(vec![cost_row(json!(3), "rg-a", "USD")])),
                Ok(reordered),
            ],
        );

        let summary = aggregator(costs, s1_directory())
            .aggregate(&ids(&["S1"]), period(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.per_group[&GroupKey::new("S1", "rg-a")].cost, dec!(3));
        assert_eq!(summary.per_group[&GroupKey::new("S1", "rg-b")].cost, dec!(4.5));
        assert_eq!(summary.per_owner[&Owner::Unknown], dec!(4.5));
        assert_eq!(summary.currency.as_deref(), Some("USD"));
        assert!(summary.incomplete_subscriptions.is_empty());
    }

    #[tokio::test]
    async fn test_page_missing_column_is_skipped() {
        let bad_schema = CostPage {
            columns: vec![
                CostColumn {
                    name: "Cost".into(),
                    kind: None,
                },
                CostColumn {
                    name: "ResourceGroup".into(),
                    kind: None,
                },
            ],
            rows: vec![vec![json!(100), json!("rg-a")]],
            next_link: None,
        };
        let costs = FakeCostClient::new().with_pages(
            "S1",
            vec![
                Ok(bad_schema),
                Ok(cost_page(vec![cost_row(json!(3), "rg-a", "USD")])),
            ],
        );
        let costs = Arc::new(costs);
        let aggregator = CostAggregator::new(costs.clone(), Arc::new(s1_directory()), "owner");

        let partial = aggregator
            .aggregate_subscription(
                "S1",
                &CostQuery::daily_cost_by_resource_group(period()),
                &CancellationToken::new(),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(partial.pages, 2);
        assert_eq!(partial.skipped_pages, 1);
        assert!(partial.complete);
        assert_eq!(partial.per_group[&GroupKey::new("S1", "rg-a")].cost, dec!(3));
    }

    #[tokio::test]
    async fn test_failed_page_keeps_earlier_pages() {
        let costs = FakeCostClient::new().with_pages(
            "S1",
            vec![
                Ok(cost_page(vec![cost_row(json!(4), "rg-a", "USD")])),
                Err(server_error()),
                Ok(cost_page(vec![cost_row(json!(50), "rg-a", "USD")])),
            ],
        );

        let summary = aggregator(costs, s1_directory())
            .aggregate(&ids(&["S1"]), period(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.per_owner[&alice()], dec!(4));
        assert_eq!(summary.incomplete_subscriptions, vec!["S1".to_string()]);
    }

    #[tokio::test]
    async fn test_directory_failure_skips_only_that_subscription() {
        let directory = s1_directory().failing_listing("S2");
        let costs = FakeCostClient::new()
            .with_pages("S1", vec![Ok(cost_page(vec![cost_row(json!(2), "rg-a", "USD")]))]);
        let costs = Arc::new(costs);
        let aggregator = CostAggregator::new(costs.clone(), Arc::new(directory), "owner");

        let summary = aggregator
            .aggregate(&ids(&["S1", "S2"]), period(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.skipped_subscriptions, vec!["S2".to_string()]);
        assert_eq!(summary.per_owner[&alice()], dec!(2));
        assert_eq!(costs.calls_for("S2"), 0);
    }

    #[tokio::test]
    async fn test_page_cap_stops_endless_pagination() {
        let costs = FakeCostClient::new()
            .with_pages("S1", vec![Ok(cost_page(vec![cost_row(json!(1), "rg-a", "USD")]))])
            .endless("S1");
        let costs = Arc::new(costs);
        let aggregator =
            CostAggregator::new(costs.clone(), Arc::new(s1_directory()), "owner").with_max_pages(5);

        let summary = aggregator
            .aggregate(&ids(&["S1"]), period(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(costs.calls_for("S1"), 5);
        assert_eq!(summary.per_owner[&alice()], dec!(5));
        assert_eq!(summary.incomplete_subscriptions, vec!["S1".to_string()]);
    }

    #[tokio::test]
    async fn test_continuation_links_are_followed() {
        let costs = FakeCostClient::new().with_pages(
            "S1",
            vec![Ok(cost_page(vec![])), Ok(cost_page(vec![])), Ok(cost_page(vec![]))],
        );
        let costs = Arc::new(costs);
        let aggregator = CostAggregator::new(costs.clone(), Arc::new(s1_directory()), "owner");

        aggregator
            .aggregate(&ids(&["S1"]), period(), &CancellationToken::new())
            .await
            .unwrap();

        let calls = costs.calls.lock().unwrap().clone();
        let links: Vec<Option<&str>> = calls.iter().map(|c| c.continuation.as_deref()).collect();
        assert_eq!(links, vec![None, Some("S1/page/1"), Some("S1/page/2")]);
    }

    #[tokio::test]
    async fn test_cancellation_is_fatal() {
        let costs = FakeCostClient::new()
            .with_pages("S1", vec![Ok(cost_page(vec![cost_row(json!(1), "rg-a", "USD")]))]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = aggregator(costs, s1_directory())
            .aggregate(&ids(&["S1"]), period(), &cancel)
            .await;

        assert!(matches!(result, Err(AggregateError::Cancelled)));
    }

    #[tokio::test]
    async fn test_duplicate_subscription_counted_once() {
        let costs = FakeCostClient::new()
            .with_pages("S1", vec![Ok(cost_page(vec![cost_row(json!(1), "rg-a", "USD")]))]);

        let summary = aggregator(costs, s1_directory())
            .aggregate(&ids(&["S1", "S1"]), period(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.per_owner[&alice()], dec!(1));
    }
}
