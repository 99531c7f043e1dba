use std::fmt;

use serde::{Serialize, Serializer};

/// Owner value recorded when no creator could be found.
///
/// Reserved: a tag carrying this value (in any casing) never names a real owner.
pub const OWNER_UNKNOWN: &str = "unknown";

/// Accountable identity for a resource group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Owner {
    /// A person, team or service principal.
    Known(String),
    /// Resolution failed after every lookback window.
    Unknown,
}

impl Owner {
    /// Interpret the value of an owner tag.
    ///
    /// Blank values and the reserved [`OWNER_UNKNOWN`] sentinel both map to
    /// [`Owner::Unknown`].
    pub fn from_tag_value(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(OWNER_UNKNOWN) {
            Owner::Unknown
        } else {
            Owner::Known(trimmed.to_string())
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Owner::Unknown)
    }

    /// The value written to (or read from) the owner tag.
    pub fn as_str(&self) -> &str {
        match self {
            Owner::Known(name) => name,
            Owner::Unknown => OWNER_UNKNOWN,
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Owner {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Where an owner assignment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerSource {
    /// Read from an existing owner tag.
    Tag,
    /// Creator found in the activity log.
    ActivityLog,
    /// No creation event in any lookback window.
    Exhausted,
    /// The activity log could not be read. The owner is undetermined and
    /// nothing may be persisted for the group this pass.
    Unresolved,
}

/// Resolved owner of one resource group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnershipRecord {
    pub subscription_id: String,
    pub resource_group: String,
    pub owner: Owner,
    pub source: OwnerSource,
}

impl OwnershipRecord {
    /// True when the owner was discovered during this run and still has to
    /// be written back as a tag.
    pub fn is_newly_resolved(&self) -> bool {
        matches!(self.source, OwnerSource::ActivityLog | OwnerSource::Exhausted)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("alice", Owner::Known("alice".into()))]
    #[case("  bob@contoso.com ", Owner::Known("bob@contoso.com".into()))]
    #[case("unknown", Owner::Unknown)]
    #[case("UNKNOWN", Owner::Unknown)]
    #[case("", Owner::Unknown)]
    #[case("   ", Owner::Unknown)]
    fn test_from_tag_value(#[case] value: &str, #[case] expected: Owner) {
        assert_eq!(Owner::from_tag_value(value), expected);
    }

    #[test]
    fn test_unknown_renders_as_sentinel() {
        assert_eq!(Owner::Unknown.to_string(), OWNER_UNKNOWN);
        assert_eq!(
            serde_json::to_string(&Owner::Unknown).unwrap(),
            format!("\"{OWNER_UNKNOWN}\"")
        );
    }
}
