//! Cost report rendering.

use std::{cmp::Ordering, collections::BTreeMap, fmt::Write};

use rust_decimal::Decimal;
use serde::Serialize;

use super::cost_aggregator::CostSummary;
use crate::models::{Owner, Period, format_timestamp};

const BANNER: &str = "##########################################";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerLine {
    pub owner: Owner,
    pub cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupLine {
    pub subscription_id: String,
    pub resource_group: String,
    pub owner: Owner,
    pub cost: Decimal,
}

impl GroupLine {
    /// `subscriptionId/resourceGroupName`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.subscription_id, self.resource_group)
    }
}

/// Groups without a known owner in one subscription, most expensive first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnownedGroups {
    pub subscription_id: String,
    pub groups: Vec<GroupLine>,
}

/// Sorted view of a [`CostSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub period: Period,
    pub currency: Option<String>,
    pub total: Decimal,
    pub owners: Vec<OwnerLine>,
    pub groups: Vec<GroupLine>,
    pub unowned: Vec<UnownedGroups>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_subscriptions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub incomplete_subscriptions: Vec<String>,
}

/// Descending by cost; ties by key so output is stable.
fn by_cost_desc<K: Ord>(a: (&Decimal, K), b: (&Decimal, K)) -> Ordering {
    b.0.cmp(a.0).then_with(|| a.1.cmp(&b.1))
}

impl Report {
    pub fn from_summary(summary: &CostSummary) -> Self {
        let mut owners: Vec<OwnerLine> = summary
            .per_owner
            .iter()
            .map(|(owner, cost)| OwnerLine {
                owner: owner.clone(),
                cost: *cost,
            })
            .collect();
        owners.sort_by(|a, b| by_cost_desc((&a.cost, &a.owner), (&b.cost, &b.owner)));

        let mut groups: Vec<GroupLine> = summary
            .per_group
            .iter()
            .map(|(key, group)| GroupLine {
                subscription_id: key.subscription_id.clone(),
                resource_group: key.name.clone(),
                owner: group.owner.clone(),
                cost: group.cost,
            })
            .collect();
        groups.sort_by(|a, b| {
            by_cost_desc(
                (&a.cost, (&a.subscription_id, &a.resource_group)),
                (&b.cost, (&b.subscription_id, &b.resource_group)),
            )
        });

        let mut unowned: BTreeMap<String, Vec<GroupLine>> = BTreeMap::new();
        for group in groups.iter().filter(|g| g.owner.is_unknown()) {
            unowned
                .entry(group.subscription_id.clone())
                .or_default()
                .push(group.clone());
        }

        let mut skipped_subscriptions = summary.skipped_subscriptions.clone();
        skipped_subscriptions.sort();
        let mut incomplete_subscriptions = summary.incomplete_subscriptions.clone();
        incomplete_subscriptions.sort();

        Self {
            period: summary.period,
            currency: summary.currency.clone(),
            total: summary.total(),
            owners,
            groups,
            unowned: unowned
                .into_iter()
                .map(|(subscription_id, groups)| UnownedGroups {
                    subscription_id,
                    groups,
                })
                .collect(),
            skipped_subscriptions,
            incomplete_subscriptions,
        }
    }

    fn amount(&self, cost: Decimal) -> String {
        let cost = cost.round_dp(2).normalize();
        match &self.currency {
            Some(currency) => format!("{currency} {cost}"),
            None => cost.to_string(),
        }
    }

    fn banner(&self, out: &mut String, title: &str) {
        let _ = writeln!(out, "{BANNER}");
        let _ = writeln!(
            out,
            "Cost between {} and {} {title}",
            format_timestamp(self.period.from),
            format_timestamp(self.period.to)
        );
        let _ = writeln!(out, "{BANNER}");
    }

    /// Plain-text report with one banner per listing.
    pub fn render_text(&self) -> String {
        let mut out = String::new();

        for section in &self.unowned {
            self.banner(
                &mut out,
                &format!(
                    "per resource group for unknown owner in subscription {}",
                    section.subscription_id
                ),
            );
            for group in &section.groups {
                let _ = writeln!(out, "{}: {}", group.key(), self.amount(group.cost));
            }
        }

        self.banner(&mut out, "per user");
        for line in &self.owners {
            let _ = writeln!(out, "{}: {}", line.owner, self.amount(line.cost));
        }

        self.banner(&mut out, "per resource group");
        for group in &self.groups {
            let _ = writeln!(
                out,
                "{}: {} (owner: {})",
                group.key(),
                self.amount(group.cost),
                group.owner
            );
        }

        let _ = writeln!(out, "{BANNER}");
        let _ = writeln!(out, "Total: {}", self.amount(self.total));
        for subscription_id in &self.skipped_subscriptions {
            let _ = writeln!(out, "Skipped subscription {subscription_id}: resource groups could not be listed");
        }
        for subscription_id in &self.incomplete_subscriptions {
            let _ = writeln!(out, "Incomplete subscription {subscription_id}: not all cost pages were read");
        }

        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
