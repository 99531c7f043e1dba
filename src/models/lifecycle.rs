use std::fmt;

use serde::Serialize;

/// The three remediation deadlines stamped on unowned resource groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineKind {
    /// Compute in the group may be deallocated.
    Deallocate,
    /// Virtual machines in the group may be deleted.
    DeleteVm,
    /// The group itself may be deleted.
    DeleteRg,
}

impl DeadlineKind {
    pub const ALL: [DeadlineKind; 3] = [
        DeadlineKind::Deallocate,
        DeadlineKind::DeleteVm,
        DeadlineKind::DeleteRg,
    ];

    /// Tag key used when configuration does not override it.
    pub fn default_tag(&self) -> &'static str {
        match self {
            DeadlineKind::Deallocate => "deallocate",
            DeadlineKind::DeleteVm => "delete-vm",
            DeadlineKind::DeleteRg => "delete-rg",
        }
    }
}

impl fmt::Display for DeadlineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_tag())
    }
}
