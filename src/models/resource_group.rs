use std::fmt;

use serde::{Deserialize, Serialize};

use super::TagMap;

/// An Azure resource group as listed by the resource manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    /// Full resource URI, e.g. `/subscriptions/{id}/resourceGroups/{name}`.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: TagMap,
}

impl ResourceGroup {
    pub fn new(subscription_id: &str, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: format!("/subscriptions/{subscription_id}/resourceGroups/{name}"),
            name,
            tags: TagMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key, value);
        self
    }
}

/// Report key for a resource group: `subscriptionId/groupName`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub subscription_id: String,
    pub name: String,
}

impl GroupKey {
    pub fn new(subscription_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subscription_id, self.name)
    }
}

impl Serialize for GroupKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
