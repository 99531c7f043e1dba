use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff for transient Resource Manager failures.
///
/// Resource Manager throttles per principal and answers `429` with a
/// `Retry-After` header. When one is present it replaces the computed backoff,
/// up to `max_retry_after_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Cap on the computed backoff.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Random jitter as a fraction of the delay (0.0-1.0).
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Longest server-requested wait that is honoured. Zero ignores
    /// `Retry-After` entirely.
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
            max_retry_after_secs: default_max_retry_after_secs(),
        }
    }
}

impl RetryConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Throttling and server-side failures. Client errors (4xx other than
    /// 429) are permanent for our calls.
    pub fn should_retry_status(&self, status: u16) -> bool {
        self.enabled && (status == 429 || (500..=599).contains(&status))
    }

    /// Wait before retry `attempt` (0-indexed).
    ///
    /// A server hint wins over the computed backoff when honoured.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after
            && self.max_retry_after_secs > 0
        {
            return hint.min(Duration::from_secs(self.max_retry_after_secs));
        }
        self.backoff(attempt)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = (self.initial_delay_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64);

        let jitter_range = capped * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            use rand::Rng;
            rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_max_retry_after_secs() -> u64 {
    60
}
