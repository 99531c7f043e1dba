use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::models::{DeadlineKind, OWNER_UNKNOWN};

/// Owner-tag and lifecycle-deadline policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaggingConfig {
    /// Tag key naming the accountable owner. Matched case-insensitively.
    #[serde(default = "default_owner_tag")]
    pub owner_tag: String,

    /// First activity-log lookback, in hours. Most groups are found here.
    #[serde(default = "default_short_lookback_hours")]
    pub short_lookback_hours: u32,

    /// Second, expensive lookback, in days. Only queried when the short
    /// window finds nothing.
    #[serde(default = "default_long_lookback_days")]
    pub long_lookback_days: u32,

    /// Log the tag changes a pass would make without applying them.
    #[serde(default)]
    pub dry_run: bool,

    /// Remove deadline tags from a group once it carries a real owner tag.
    #[serde(default)]
    pub clear_deadlines_on_claim: bool,

    /// Deadline tags stamped on groups whose owner stays unknown.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            owner_tag: default_owner_tag(),
            short_lookback_hours: default_short_lookback_hours(),
            long_lookback_days: default_long_lookback_days(),
            dry_run: false,
            clear_deadlines_on_claim: false,
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl TaggingConfig {
    pub fn short_lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.short_lookback_hours))
    }

    pub fn long_lookback(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.long_lookback_days))
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        let owner_tag = self.owner_tag.trim();
        if owner_tag.is_empty() {
            return Err(ConfigError::Validation(
                "tagging.owner_tag must not be empty".into(),
            ));
        }
        if owner_tag != self.owner_tag {
            return Err(ConfigError::Validation(format!(
                "tagging.owner_tag '{}' must not have surrounding whitespace",
                self.owner_tag
            )));
        }
        if owner_tag.eq_ignore_ascii_case(OWNER_UNKNOWN) {
            return Err(ConfigError::Validation(format!(
                "tagging.owner_tag must not be the reserved value '{OWNER_UNKNOWN}'"
            )));
        }
        if self.short_lookback_hours == 0 {
            return Err(ConfigError::Validation(
                "tagging.short_lookback_hours must be greater than zero".into(),
            ));
        }
        if self.short_lookback() >= self.long_lookback() {
            return Err(ConfigError::Validation(format!(
                "tagging.short_lookback_hours ({}h) must be shorter than \
                 tagging.long_lookback_days ({}d)",
                self.short_lookback_hours, self.long_lookback_days
            )));
        }

        let mut seen = HashSet::from([owner_tag.to_lowercase()]);
        for kind in DeadlineKind::ALL {
            let raw = &self.lifecycle.get(kind).tag;
            let tag = raw.trim();
            if tag.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "tagging.lifecycle.{kind} tag must not be empty"
                )));
            }
            if tag != raw {
                return Err(ConfigError::Validation(format!(
                    "tagging.lifecycle.{kind} tag '{raw}' must not have surrounding whitespace"
                )));
            }
            if !seen.insert(tag.to_lowercase()) {
                return Err(ConfigError::Validation(format!(
                    "tagging.lifecycle tag '{tag}' collides with the owner tag or another \
                     deadline tag"
                )));
            }
        }

        Ok(())
    }
}

fn default_owner_tag() -> String {
    "owner".to_string()
}

fn default_short_lookback_hours() -> u32 {
    25
}

fn default_long_lookback_days() -> u32 {
    90
}

/// Tag key and offset for one deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeadlineConfig {
    pub tag: String,
    /// Days after the first unresolved pass at which the deadline falls.
    pub offset_days: u32,
}

/// The three lifecycle deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LifecycleConfig {
    #[serde(default = "default_deallocate")]
    pub deallocate: DeadlineConfig,
    #[serde(default = "default_delete_vm")]
    pub delete_vm: DeadlineConfig,
    #[serde(default = "default_delete_rg")]
    pub delete_rg: DeadlineConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            deallocate: default_deallocate(),
            delete_vm: default_delete_vm(),
            delete_rg: default_delete_rg(),
        }
    }
}

impl LifecycleConfig {
    pub fn get(&self, kind: DeadlineKind) -> &DeadlineConfig {
        match kind {
            DeadlineKind::Deallocate => &self.deallocate,
            DeadlineKind::DeleteVm => &self.delete_vm,
            DeadlineKind::DeleteRg => &self.delete_rg,
        }
    }

    /// `(kind, config)` for every deadline, in escalation order.
    pub fn iter(&self) -> impl Iterator<Item = (DeadlineKind, &DeadlineConfig)> {
        DeadlineKind::ALL.into_iter().map(|kind| (kind, self.get(kind)))
    }
}

fn deadline(kind: DeadlineKind, offset_days: u32) -> DeadlineConfig {
    DeadlineConfig {
        tag: kind.default_tag().to_string(),
        offset_days,
    }
}

fn default_deallocate() -> DeadlineConfig {
    deadline(DeadlineKind::Deallocate, 7)
}

fn default_delete_vm() -> DeadlineConfig {
    deadline(DeadlineKind::DeleteVm, 14)
}

fn default_delete_rg() -> DeadlineConfig {
    deadline(DeadlineKind::DeleteRg, 30)
}
