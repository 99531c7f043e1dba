//! Cost Management query API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ArmClient, ClientResult, CostQueryClient};
use crate::models::{CostColumn, CostPage, CostQuery};

const COST_API_VERSION: &str = "2019-01-01";

#[derive(Debug, Deserialize)]
struct QueryResponse {
    properties: QueryProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryProperties {
    #[serde(default)]
    next_link: Option<String>,
    #[serde(default)]
    columns: Vec<CostColumn>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

impl From<QueryResponse> for CostPage {
    fn from(response: QueryResponse) -> Self {
        let QueryProperties {
            next_link,
            columns,
            rows,
        } = response.properties;
        CostPage {
            columns,
            rows,
            next_link: next_link.filter(|link| !link.is_empty()),
        }
    }
}

#[async_trait]
impl CostQueryClient for ArmClient {
    async fn query(
        &self,
        subscription_id: &str,
        query: &CostQuery,
        continuation: Option<&str>,
    ) -> ClientResult<CostPage> {
        // Continuation pages are POSTed with the same body to the link as given
        let url = match continuation {
            Some(link) => link.to_string(),
            None => self.url(&format!(
                "/subscriptions/{subscription_id}/providers/Microsoft.CostManagement/query?api-version={COST_API_VERSION}"
            )),
        };

        let response = self
            .send("cost_query", || self.http().post(&url).json(query))
            .await?;
        let body: QueryResponse = Self::decode(response).await?;

        tracing::debug!(
            subscription_id,
            rows = body.properties.rows.len(),
            has_next = body.properties.next_link.is_some(),
            "Fetched cost page"
        );

        Ok(body.into())
    }
}
