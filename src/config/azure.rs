use serde::{Deserialize, Deserializer, Serialize};

use super::ConfigError;

/// Azure Resource Manager endpoint for the public cloud.
pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

/// Azure connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AzureConfig {
    /// Resource Manager base URL. Override for sovereign clouds or tests.
    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,

    /// Subscriptions to scan. Accepts a comma-separated string or an array.
    #[serde(deserialize_with = "deserialize_subscription_ids")]
    pub subscription_ids: Vec<String>,

    /// How to obtain a Resource Manager access token.
    pub auth: AzureAuth,
}

impl AzureConfig {
    /// Endpoint without a trailing slash.
    pub fn endpoint(&self) -> &str {
        self.management_endpoint.trim_end_matches('/')
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.subscription_ids.is_empty() {
            return Err(ConfigError::Validation(
                "azure.subscription_ids must list at least one subscription".into(),
            ));
        }
        if !self.management_endpoint.starts_with("http://")
            && !self.management_endpoint.starts_with("https://")
        {
            return Err(ConfigError::Validation(format!(
                "azure.management_endpoint must be an http(s) URL, got '{}'",
                self.management_endpoint
            )));
        }
        self.auth.validate()
    }
}

fn default_management_endpoint() -> String {
    DEFAULT_MANAGEMENT_ENDPOINT.to_string()
}

fn deserialize_subscription_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Ids {
        Csv(String),
        List(Vec<String>),
    }

    let raw = match Ids::deserialize(deserializer)? {
        Ids::Csv(csv) => csv.split(',').map(str::to_string).collect(),
        Ids::List(list) => list,
    };

    Ok(raw
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect())
}

/// Azure authentication configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum AzureAuth {
    /// Service principal with a client secret.
    ServicePrincipal {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },

    /// Managed identity of the host (App Service, Functions, VM).
    ManagedIdentity {
        /// Client ID of a user-assigned identity; omit for system-assigned.
        #[serde(default)]
        client_id: Option<String>,
    },

    /// Pre-acquired bearer token, e.g. from `az account get-access-token`.
    /// Intended for local runs; the token is never refreshed.
    AccessToken { token: String },
}

impl AzureAuth {
    fn validate(&self) -> Result<(), ConfigError> {
        let blank = |field: &str, value: &str| {
            if value.trim().is_empty() {
                Err(ConfigError::Validation(format!(
                    "azure.auth.{field} must not be empty"
                )))
            } else {
                Ok(())
            }
        };

        match self {
            AzureAuth::ServicePrincipal {
                tenant_id,
                client_id,
                client_secret,
            } => {
                blank("tenant_id", tenant_id)?;
                blank("client_id", client_id)?;
                blank("client_secret", client_secret)
            }
            AzureAuth::ManagedIdentity { client_id } => match client_id {
                Some(id) => blank("client_id", id),
                None => Ok(()),
            },
            AzureAuth::AccessToken { token } => blank("token", token),
        }
    }
}

impl std::fmt::Debug for AzureAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AzureAuth::ServicePrincipal {
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ServicePrincipal")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .field("client_secret", &"****")
                .finish(),
            AzureAuth::ManagedIdentity { client_id } => f
                .debug_struct("ManagedIdentity")
                .field("client_id", client_id)
                .finish(),
            AzureAuth::AccessToken { .. } => f
                .debug_struct("AccessToken")
                .field("token", &"****")
                .finish(),
        }
    }
}
