use std::{sync::Arc, time::Duration};

use reqwest::{Client, RequestBuilder, Response, header::AUTHORIZATION};
use serde::{Deserialize, de::DeserializeOwned};

use super::{ClientError, ClientResult, CredentialProvider, credential_from_config, retry::with_retry};
use crate::config::{AppConfig, RetryConfig};

/// HTTP client for Azure Resource Manager.
///
/// Implements [`CostQueryClient`](super::CostQueryClient),
/// [`ResourceDirectory`](super::ResourceDirectory) and
/// [`ActivityLogClient`](super::ActivityLogClient). Every request carries a
/// bearer token from the configured [`CredentialProvider`] and is retried on
/// transient failures.
#[derive(Clone)]
pub struct ArmClient {
    http_client: Client,
    endpoint: String,
    credential: Arc<dyn CredentialProvider>,
    retry_config: RetryConfig,
    max_list_pages: u32,
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("endpoint", &self.endpoint)
            .field("max_list_pages", &self.max_list_pages)
            .finish_non_exhaustive()
    }
}

impl ArmClient {
    pub fn from_config(config: &AppConfig) -> ClientResult<Self> {
        let credential = credential_from_config(&config.azure.auth)?;
        Self::new(
            config.azure.endpoint(),
            credential,
            config.retry.clone(),
            config.runtime.request_timeout(),
            config.runtime.max_list_pages,
        )
    }

    pub fn new(
        endpoint: impl Into<String>,
        credential: Arc<dyn CredentialProvider>,
        retry_config: RetryConfig,
        request_timeout: Duration,
        max_list_pages: u32,
    ) -> ClientResult<Self> {
        let http_client = Client::builder().timeout(request_timeout).build()?;

        let mut endpoint = endpoint.into();
        while endpoint.ends_with('/') {
            endpoint.pop();
        }

        Ok(Self {
            http_client,
            endpoint,
            credential,
            retry_config,
            max_list_pages: max_list_pages.max(1),
        })
    }

    /// Absolute URL for a path below the management endpoint.
    pub(super) fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    pub(super) fn http(&self) -> &Client {
        &self.http_client
    }

    /// Send an authorized request with retries. Non-success statuses become
    /// [`ClientError::Http`].
    pub(super) async fn send<F>(&self, operation: &str, build: F) -> ClientResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let bearer = self.credential.bearer_header().await?;

        let response = with_retry(&self.retry_config, operation, || {
            build().header(AUTHORIZATION, &*bearer).send()
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http { status, body });
        }

        Ok(response)
    }

    pub(super) async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// GET a `{value, nextLink}` listing and follow `nextLink` up to the page cap.
    pub(super) async fn get_all_pages<T, F>(
        &self,
        operation: &str,
        first_page: F,
    ) -> ClientResult<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let response = self.send(operation, &first_page).await?;
        let mut page: ArmList<T> = Self::decode(response).await?;
        let mut items = std::mem::take(&mut page.value);
        let mut pages = 1;

        while let Some(next) = page.next_link.take().filter(|link| !link.is_empty()) {
            if pages >= self.max_list_pages {
                tracing::warn!(
                    operation,
                    max_pages = self.max_list_pages,
                    "Listing page limit reached, remaining pages ignored"
                );
                break;
            }
            let response = self.send(operation, || self.http_client.get(&next)).await?;
            page = Self::decode(response).await?;
            items.append(&mut page.value);
            pages += 1;
        }

        Ok(items)
    }
}

/// Standard Resource Manager list envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ArmList<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(default)]
    pub next_link: Option<String>,
}
