use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Cost report settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostConfig {
    /// Length of the trailing window the report covers, in days.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Hard cap on cost pages fetched per subscription. Guards against a
    /// continuation link that never ends.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            max_pages: default_max_pages(),
        }
    }
}

impl CostConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.lookback_days == 0 {
            return Err(ConfigError::Validation(
                "cost.lookback_days must be greater than zero".into(),
            ));
        }
        if self.max_pages == 0 {
            return Err(ConfigError::Validation(
                "cost.max_pages must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_lookback_days() -> u32 {
    30
}

fn default_max_pages() -> u32 {
    1000
}

/// Concurrency, deadlines and scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Subscriptions processed at the same time.
    #[serde(default = "default_subscription_concurrency")]
    pub subscription_concurrency: usize,

    /// Resource groups resolved and tagged at the same time, per subscription.
    #[serde(default = "default_resource_group_concurrency")]
    pub resource_group_concurrency: usize,

    /// Overall deadline for one run. Outstanding requests are abandoned when
    /// it elapses.
    #[serde(default)]
    pub deadline_secs: Option<u64>,

    /// Pause between tagging passes in watch mode.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Timeout for a single HTTP request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Hard cap on pages followed when listing resource groups or activity
    /// log events.
    #[serde(default = "default_max_list_pages")]
    pub max_list_pages: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            subscription_concurrency: default_subscription_concurrency(),
            resource_group_concurrency: default_resource_group_concurrency(),
            deadline_secs: None,
            interval_secs: default_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_list_pages: default_max_list_pages(),
        }
    }
}

impl RuntimeConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.subscription_concurrency == 0 || self.resource_group_concurrency == 0 {
            return Err(ConfigError::Validation(
                "runtime concurrency limits must be greater than zero".into(),
            ));
        }
        if self.deadline_secs == Some(0) {
            return Err(ConfigError::Validation(
                "runtime.deadline_secs must be greater than zero when set".into(),
            ));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "runtime.interval_secs must be greater than zero".into(),
            ));
        }
        if self.max_list_pages == 0 {
            return Err(ConfigError::Validation(
                "runtime.max_list_pages must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_subscription_concurrency() -> usize {
    4
}

fn default_resource_group_concurrency() -> usize {
    8
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_list_pages() -> u32 {
    100
}
