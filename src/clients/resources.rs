//! Resource group listing and tag updates.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use super::{ArmClient, ClientResult, ResourceDirectory};
use crate::models::{ResourceGroup, TagPatch};

const RESOURCES_API_VERSION: &str = "2021-04-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
enum TagOperation {
    /// Add or overwrite the given tags, leaving others alone.
    Merge,
    /// Make the given tags the complete tag set.
    Replace,
}

#[derive(Debug, Serialize)]
struct TagsPatchBody {
    operation: TagOperation,
    properties: TagsProperties,
}

#[derive(Debug, Serialize)]
struct TagsProperties {
    tags: BTreeMap<String, String>,
}

/// Translate a patch into a single Tags API request.
///
/// Pure writes become a `Merge`. A patch that removes keys becomes a
/// `Replace` of the group's tag set with the patch applied, so writes and
/// removals still land in one call.
fn tags_body(group: &ResourceGroup, patch: &TagPatch) -> TagsPatchBody {
    if patch.remove.is_empty() {
        return TagsPatchBody {
            operation: TagOperation::Merge,
            properties: TagsProperties {
                tags: patch.merge.clone(),
            },
        };
    }

    let mut tags = group.tags.clone();
    tags.apply(patch);
    TagsPatchBody {
        operation: TagOperation::Replace,
        properties: TagsProperties { tags: tags.into() },
    }
}

#[async_trait]
impl ResourceDirectory for ArmClient {
    async fn list_resource_groups(&self, subscription_id: &str) -> ClientResult<Vec<ResourceGroup>> {
        let url = self.url(&format!(
            "/subscriptions/{subscription_id}/resourcegroups?api-version={RESOURCES_API_VERSION}"
        ));

        let groups: Vec<ResourceGroup> = self
            .get_all_pages("list_resource_groups", || self.http().get(&url))
            .await?;

        tracing::debug!(subscription_id, count = groups.len(), "Listed resource groups");
        Ok(groups)
    }

    async fn update_tags(&self, group: &ResourceGroup, patch: &TagPatch) -> ClientResult<()> {
        let url = self.url(&format!(
            "{}/providers/Microsoft.Resources/tags/default?api-version={RESOURCES_API_VERSION}",
            group.id
        ));
        let body = tags_body(group, patch);

        self.send("update_tags", || self.http().patch(&url).json(&body))
            .await?;

        tracing::debug!(
            resource_group = %group.name,
            operation = ?body.operation,
            tags = body.properties.tags.len(),
            "Updated resource group tags"
        );
        Ok(())
    }
}
