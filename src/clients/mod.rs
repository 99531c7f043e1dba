//! Azure Resource Manager collaborators.
//!
//! The core services only see the three traits below. [`ArmClient`] implements
//! all of them over HTTP; tests substitute in-memory fakes.

mod activity_log;
mod arm;
mod cost_management;
pub mod credential;
mod error;
mod resources;
pub mod retry;

use std::future::Future;

pub use arm::ArmClient;
use async_trait::async_trait;
pub use credential::{CredentialProvider, StaticCredential, credential_from_config};
pub use error::{ClientError, ClientResult};
use tokio_util::sync::CancellationToken;

use crate::models::{ActivityEvent, ActivityQuery, CostPage, CostQuery, ResourceGroup, TagPatch};

/// Paged cost queries against the billing API.
#[async_trait]
pub trait CostQueryClient: Send + Sync {
    /// Fetch one page. `continuation` is the `next_link` of the previous page,
    /// or `None` for the first one.
    async fn query(
        &self,
        subscription_id: &str,
        query: &CostQuery,
        continuation: Option<&str>,
    ) -> ClientResult<CostPage>;
}

/// Resource groups of a subscription and their tags.
#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    async fn list_resource_groups(&self, subscription_id: &str) -> ClientResult<Vec<ResourceGroup>>;

    /// Apply `patch` to the group's tags in one call.
    async fn update_tags(&self, group: &ResourceGroup, patch: &TagPatch) -> ClientResult<()>;
}

/// Historical management operations.
#[async_trait]
pub trait ActivityLogClient: Send + Sync {
    /// Events recorded for `query.resource_uri` within the query window, in
    /// the order the service returns them.
    async fn list_events(
        &self,
        subscription_id: &str,
        query: &ActivityQuery,
    ) -> ClientResult<Vec<ActivityEvent>>;
}

/// Run `fut` unless `cancel` fires first, in which case the call is dropped.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> ClientResult<T>
where
    F: Future<Output = ClientResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        result = fut => result,
    }
}
