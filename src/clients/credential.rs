//! Access tokens for Azure Resource Manager.
//!
//! Service principal and managed identity tokens are acquired through
//! `azure_identity` and cached until shortly before expiry. The cache holds the
//! pre-formatted `Bearer` header so concurrent callers share one allocation.

use std::sync::Arc;

use async_trait::async_trait;

use super::ClientResult;
use crate::config::AzureAuth;

/// Scope requested for Resource Manager calls.
pub const ARM_SCOPE: &str = "https://management.azure.com/.default";

/// Source of `Authorization` header values.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A valid `Bearer {token}` header value.
    async fn bearer_header(&self) -> ClientResult<Arc<str>>;
}

/// Build the provider selected by `[azure.auth]`.
pub fn credential_from_config(auth: &AzureAuth) -> ClientResult<Arc<dyn CredentialProvider>> {
    match auth {
        AzureAuth::AccessToken { token } => Ok(Arc::new(StaticCredential::new(token))),
        #[cfg(feature = "azure-identity")]
        AzureAuth::ServicePrincipal { .. } | AzureAuth::ManagedIdentity { .. } => {
            Ok(Arc::new(AzureTokenSource::from_config(auth)?))
        }
        #[cfg(not(feature = "azure-identity"))]
        AzureAuth::ServicePrincipal { .. } | AzureAuth::ManagedIdentity { .. } => {
            Err(super::ClientError::Auth(
                "built without the azure-identity feature; use auth type 'access_token'".into(),
            ))
        }
    }
}

/// A fixed token that is never refreshed.
pub struct StaticCredential {
    bearer_header: Arc<str>,
}

impl StaticCredential {
    pub fn new(token: &str) -> Self {
        Self {
            bearer_header: format!("Bearer {}", token.trim()).into(),
        }
    }
}

impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredential").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn bearer_header(&self) -> ClientResult<Arc<str>> {
        Ok(self.bearer_header.clone())
    }
}

#[cfg(feature = "azure-identity")]
pub use token_source::AzureTokenSource;

#[cfg(feature = "azure-identity")]
mod token_source {
    use std::{
        sync::Arc,
        time::{Duration, Instant},
    };

    use async_trait::async_trait;
    use azure_core::credentials::{AccessToken, Secret, TokenCredential};
    use azure_identity::{
        ClientSecretCredential, ManagedIdentityCredential, ManagedIdentityCredentialOptions,
        UserAssignedId,
    };
    use tokio::sync::RwLock;

    use super::{ARM_SCOPE, CredentialProvider};
    use crate::{
        clients::{ClientError, ClientResult},
        config::AzureAuth,
    };

    /// Refresh this long before the token actually expires.
    const TOKEN_REFRESH_BUFFER_SECS: u64 = 300;

    #[derive(Debug, Clone)]
    pub(super) struct CachedToken {
        pub(super) bearer_header: Arc<str>,
        /// Expiry with the refresh buffer already subtracted.
        pub(super) expires_at: Instant,
    }

    impl CachedToken {
        pub(super) fn is_expired(&self) -> bool {
            Instant::now() >= self.expires_at
        }
    }

    /// Token source backed by a service principal or a managed identity.
    pub struct AzureTokenSource {
        credential: Arc<dyn TokenCredential>,
        auth_type: &'static str,
        cached_token: RwLock<Option<CachedToken>>,
    }

    impl std::fmt::Debug for AzureTokenSource {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("AzureTokenSource")
                .field("type", &self.auth_type)
                .finish()
        }
    }

    impl AzureTokenSource {
        pub fn from_service_principal(
            tenant_id: &str,
            client_id: &str,
            client_secret: &str,
        ) -> ClientResult<Self> {
            let credential = ClientSecretCredential::new(
                tenant_id,
                client_id.to_string(),
                Secret::new(client_secret.to_string()),
                None,
            )
            .map_err(|e| {
                ClientError::Auth(format!("failed to create client secret credential: {e}"))
            })?;

            Ok(Self {
                credential,
                auth_type: "ServicePrincipal",
                cached_token: RwLock::new(None),
            })
        }

        /// System-assigned identity when `client_id` is `None`, user-assigned otherwise.
        pub fn from_managed_identity(client_id: Option<&str>) -> ClientResult<Self> {
            let options = client_id.map(|id| {
                tracing::info!(client_id = id, "Using user-assigned managed identity");
                ManagedIdentityCredentialOptions {
                    user_assigned_id: Some(UserAssignedId::ClientId(id.to_string())),
                    ..Default::default()
                }
            });

            let credential = ManagedIdentityCredential::new(options).map_err(|e| {
                ClientError::Auth(format!("failed to create managed identity credential: {e}"))
            })?;

            Ok(Self {
                credential,
                auth_type: "ManagedIdentity",
                cached_token: RwLock::new(None),
            })
        }

        pub fn from_config(auth: &AzureAuth) -> ClientResult<Self> {
            match auth {
                AzureAuth::ServicePrincipal {
                    tenant_id,
                    client_id,
                    client_secret,
                } => Self::from_service_principal(tenant_id, client_id, client_secret),
                AzureAuth::ManagedIdentity { client_id } => {
                    Self::from_managed_identity(client_id.as_deref())
                }
                AzureAuth::AccessToken { .. } => Err(ClientError::Auth(
                    "access_token auth does not use the identity client".into(),
                )),
            }
        }
    }

    #[async_trait]
    impl CredentialProvider for AzureTokenSource {
        async fn bearer_header(&self) -> ClientResult<Arc<str>> {
            {
                let cache = self.cached_token.read().await;
                if let Some(ref cached) = *cache
                    && !cached.is_expired()
                {
                    return Ok(cached.bearer_header.clone());
                }
            }

            let mut cache = self.cached_token.write().await;

            // Another task may have refreshed while we waited for the write lock
            if let Some(ref cached) = *cache
                && !cached.is_expired()
            {
                return Ok(cached.bearer_header.clone());
            }

            let access_token: AccessToken = self
                .credential
                .get_token(&[ARM_SCOPE], None)
                .await
                .map_err(|e| ClientError::Auth(format!("failed to get Azure token: {e}")))?;

            let expires_in = access_token.expires_on - time::OffsetDateTime::now_utc();
            let expires_in_secs = expires_in.whole_seconds().max(0) as u64;
            let expires_at = Instant::now()
                + Duration::from_secs(expires_in_secs)
                    .saturating_sub(Duration::from_secs(TOKEN_REFRESH_BUFFER_SECS));

            let bearer_header: Arc<str> =
                format!("Bearer {}", access_token.token.secret()).into();

            *cache = Some(CachedToken {
                bearer_header: bearer_header.clone(),
                expires_at,
            });

            tracing::debug!(
                auth_type = self.auth_type,
                expires_in_secs,
                "Acquired new Resource Manager token"
            );

            Ok(bearer_header)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_credential_formats_bearer() {
        let credential = StaticCredential::new("  abc  ");
        assert_eq!(&*credential.bearer_header().await.unwrap(), "Bearer abc");
    }

    #[tokio::test]
    async fn test_access_token_config_builds_static_provider() {
        let auth = AzureAuth::AccessToken {
            token: "abc".into(),
        };
        let provider = credential_from_config(&auth).unwrap();
        assert_eq!(&*provider.bearer_header().await.unwrap(), "Bearer abc");
    }
}
