//! Configuration for tagwarden.
//!
//! Loaded from a TOML file, with support for environment variable
//! interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [azure]
//! subscription_ids = "00000000-0000-0000-0000-000000000001,00000000-0000-0000-0000-000000000002"
//!
//! [azure.auth]
//! type = "service_principal"
//! tenant_id = "${AZURE_TENANT_ID}"
//! client_id = "${AZURE_CLIENT_ID}"
//! client_secret = "${AZURE_CLIENT_SECRET}"
//!
//! [tagging]
//! owner_tag = "owner"
//! ```

mod azure;
mod observability;
mod retry;
mod runtime;
mod tagging;

use std::path::Path;

pub use azure::*;
pub use observability::*;
pub use retry::*;
pub use runtime::*;
use serde::{Deserialize, Serialize};
pub use tagging::*;

/// Root configuration.
///
/// Only `[azure]` is required; every other section has defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Subscriptions, endpoint and credentials.
    pub azure: AzureConfig,

    /// Owner tag and lifecycle deadline policy.
    #[serde(default)]
    pub tagging: TaggingConfig,

    /// Cost report window and pagination limits.
    #[serde(default)]
    pub cost: CostConfig,

    /// Concurrency, deadlines and scheduling.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Retry policy for transient HTTP failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: AppConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&self) -> Result<(), ConfigError> {
        self.azure.validate()?;
        self.tagging.validate()?;
        self.cost.validate()?;
        self.runtime.validate()?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(format!("env var pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            // Skip if this variable is inside a comment
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

/// Starter configuration written by `tagwarden init`.
pub fn default_config_toml() -> &'static str {
    r#"# tagwarden configuration

[azure]
# Comma-separated list (or TOML array) of subscription ids to scan.
subscription_ids = "${AZURE_SUBSCRIPTION_IDS}"

# Service principal login. Use `type = "managed_identity"` when running
# inside Azure (add `client_id` for a user-assigned identity).
[azure.auth]
type = "service_principal"
tenant_id = "${AZURE_TENANT_ID}"
client_id = "${AZURE_CLIENT_ID}"
client_secret = "${AZURE_CLIENT_SECRET}"

[tagging]
owner_tag = "owner"
short_lookback_hours = 25
long_lookback_days = 90
dry_run = false

[tagging.lifecycle]
deallocate = { tag = "deallocate", offset_days = 7 }
delete_vm = { tag = "delete-vm", offset_days = 14 }
delete_rg = { tag = "delete-rg", offset_days = 30 }

[cost]
lookback_days = 30

[runtime]
subscription_concurrency = 4
deadline_secs = 1800

[observability.logging]
level = "info"
format = "compact"
"#
}
