//! Cost attribution and ownership tagging for Azure resource groups.
//!
//! - [`services::CostAggregator`] folds paginated cost rows into per-owner and
//!   per-group totals.
//! - [`services::OwnerResolver`] finds the creator of an untagged group in the
//!   activity log.
//! - [`services::LifecycleEngine`] stamps escalating cleanup deadlines on
//!   groups nobody owns.
//! - [`jobs::TaggingPass`] ties the last two together on a schedule.

pub mod clients;
pub mod config;
pub mod jobs;
pub mod models;
pub mod observability;
pub mod services;

#[cfg(test)]
mod test_utils;
