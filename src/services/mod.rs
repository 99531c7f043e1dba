//! Core services: cost attribution, owner resolution, lifecycle tags and the
//! cost report.

pub mod cost_aggregator;
pub mod lifecycle;
pub mod owner_resolver;
pub mod report;

pub use cost_aggregator::{AggregateError, CostAggregator, CostSummary, GroupCost, SubscriptionCosts};
pub use lifecycle::LifecycleEngine;
pub use owner_resolver::{OwnerResolver, tagged_owner};
pub use report::Report;
