//! In-memory collaborators for service and job tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::{
    clients::{
        ActivityLogClient, ClientError, ClientResult, CostQueryClient, ResourceDirectory,
    },
    models::{
        ActivityEvent, ActivityQuery, COST_COLUMN, CURRENCY_COLUMN, CostColumn, CostPage,
        CostQuery, GROUP_COLUMN, ResourceGroup, TagPatch,
    },
};

pub fn server_error() -> ClientError {
    ClientError::Http {
        status: StatusCode::SERVICE_UNAVAILABLE,
        body: "unavailable".into(),
    }
}

/// Columns in the order the billing API usually returns them.
pub fn cost_columns() -> Vec<CostColumn> {
    [COST_COLUMN, "UsageDate", GROUP_COLUMN, CURRENCY_COLUMN]
        .into_iter()
        .map(|name| CostColumn {
            name: name.to_string(),
            kind: None,
        })
        .collect()
}

/// A row matching [`cost_columns`].
pub fn cost_row(amount: Value, group: &str, currency: &str) -> Vec<Value> {
    vec![amount, json!(20240101), json!(group), json!(currency)]
}

pub fn cost_page(rows: Vec<Vec<Value>>) -> CostPage {
    CostPage {
        columns: cost_columns(),
        rows,
        next_link: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostCall {
    pub subscription_id: String,
    pub continuation: Option<String>,
}

/// Serves a scripted sequence of pages per subscription.
///
/// Pages are linked automatically: each page except the last gets a
/// `next_link` of `"{subscription}/page/{n}"`. An `Err` entry fails that
/// fetch. With `endless` set, the last page keeps linking to itself.
#[derive(Default)]
pub struct FakeCostClient {
    pages: Mutex<HashMap<String, Vec<ClientResult<CostPage>>>>,
    endless: HashSet<String>,
    pub calls: Mutex<Vec<CostCall>>,
}

impl FakeCostClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(self, subscription_id: &str, pages: Vec<ClientResult<CostPage>>) -> Self {
        if let Ok(mut map) = self.pages.lock() {
            map.insert(subscription_id.to_string(), pages);
        }
        self
    }

    pub fn endless(mut self, subscription_id: &str) -> Self {
        self.endless.insert(subscription_id.to_string());
        self
    }

    pub fn calls_for(&self, subscription_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.subscription_id == subscription_id)
            .count()
    }
}

#[async_trait]
impl CostQueryClient for FakeCostClient {
    async fn query(
        &self,
        subscription_id: &str,
        _query: &CostQuery,
        continuation: Option<&str>,
    ) -> ClientResult<CostPage> {
        self.calls.lock().unwrap().push(CostCall {
            subscription_id: subscription_id.to_string(),
            continuation: continuation.map(str::to_string),
        });

        let index = match continuation {
            None => 0,
            Some(link) => link
                .rsplit('/')
                .next()
                .and_then(|n| n.parse::<usize>().ok())
                .unwrap_or(usize::MAX),
        };

        let pages = self.pages.lock().unwrap();
        let Some(script) = pages.get(subscription_id) else {
            return Ok(CostPage::default());
        };

        let endless = self.endless.contains(subscription_id);
        let slot = if endless {
            index.min(script.len().saturating_sub(1))
        } else {
            index
        };

        match script.get(slot) {
            Some(Ok(page)) => {
                let mut page = page.clone();
                if endless || slot + 1 < script.len() {
                    page.next_link = Some(format!("{subscription_id}/page/{}", index + 1));
                }
                Ok(page)
            }
            Some(Err(_)) => Err(server_error()),
            None => Ok(CostPage::default()),
        }
    }
}

/// Resource groups per subscription, with recorded tag updates.
#[derive(Default)]
pub struct FakeDirectory {
    groups: Mutex<HashMap<String, Vec<ResourceGroup>>>,
    failing_subscriptions: HashSet<String>,
    failing_updates: HashSet<String>,
    pub updates: Mutex<Vec<(ResourceGroup, TagPatch)>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups(self, subscription_id: &str, groups: Vec<ResourceGroup>) -> Self {
        if let Ok(mut map) = self.groups.lock() {
            map.insert(subscription_id.to_string(), groups);
        }
        self
    }

    pub fn failing_listing(mut self, subscription_id: &str) -> Self {
        self.failing_subscriptions
            .insert(subscription_id.to_string());
        self
    }

    pub fn failing_update(mut self, group_name: &str) -> Self {
        self.failing_updates.insert(group_name.to_string());
        self
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    /// The patch sent for `group_name`, if exactly one was sent.
    pub fn patch_for(&self, group_name: &str) -> Option<TagPatch> {
        let updates = self.updates.lock().unwrap();
        let mut matching = updates.iter().filter(|(g, _)| g.name == group_name);
        let first = matching.next()?.1.clone();
        matching.next().is_none().then_some(first)
    }

    /// Apply recorded patches to the stored groups, as the real service would.
    pub fn commit(&self) {
        let updates = std::mem::take(&mut *self.updates.lock().unwrap());
        let mut groups = self.groups.lock().unwrap();
        for (group, patch) in updates {
            for list in groups.values_mut() {
                if let Some(stored) = list.iter_mut().find(|g| g.id == group.id) {
                    stored.tags.apply(&patch);
                }
            }
        }
    }

    pub fn group(&self, subscription_id: &str, name: &str) -> Option<ResourceGroup> {
        self.groups
            .lock()
            .unwrap()
            .get(subscription_id)?
            .iter()
            .find(|g| g.name == name)
            .cloned()
    }
}

#[async_trait]
impl ResourceDirectory for FakeDirectory {
    async fn list_resource_groups(&self, subscription_id: &str) -> ClientResult<Vec<ResourceGroup>> {
        if self.failing_subscriptions.contains(subscription_id) {
            return Err(server_error());
        }
        Ok(self
            .groups
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_tags(&self, group: &ResourceGroup, patch: &TagPatch) -> ClientResult<()> {
        if self.failing_updates.contains(&group.name) {
            return Err(server_error());
        }
        self.updates
            .lock()
            .unwrap()
            .push((group.clone(), patch.clone()));
        Ok(())
    }
}

/// Activity events per resource URI, with recorded queries.
///
/// An event is returned only if its timestamp falls within the query window,
/// like the real filter.
#[derive(Default)]
pub struct FakeActivityLog {
    events: HashMap<String, Vec<ActivityEvent>>,
    failing: bool,
    pub queries: Mutex<Vec<ActivityQuery>>,
}

impl FakeActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, resource_uri: &str, events: Vec<ActivityEvent>) -> Self {
        self.events.insert(resource_uri.to_string(), events);
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn recorded(&self) -> Vec<ActivityQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivityLogClient for FakeActivityLog {
    async fn list_events(
        &self,
        _subscription_id: &str,
        query: &ActivityQuery,
    ) -> ClientResult<Vec<ActivityEvent>> {
        self.queries.lock().unwrap().push(query.clone());
        if self.failing {
            return Err(server_error());
        }
        Ok(self
            .events
            .get(&query.resource_uri)
            .into_iter()
            .flatten()
            .filter(|e| e.event_timestamp >= query.start && e.event_timestamp <= query.end)
            .cloned()
            .collect())
    }
}
