//! Ordering of deletes relative to creates when a diff is applied

use serde::{Deserialize, Serialize};

/// Which half of a diff is submitted first
///
/// Deletes go first only where the provider rejects old and new entries
/// coexisting; otherwise creates go first so nothing is briefly missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOrder {
    /// Submit deletes, wait until they are settled, then submit creates
    DeleteFirst,
    /// Submit creates, then deletes
    CreateFirst,
}

impl ApplyOrder {
    /// Order for a resource kind
    pub const fn for_kind(duplicates_tolerated: bool) -> Self {
        if duplicates_tolerated {
            Self::CreateFirst
        } else {
            Self::DeleteFirst
        }
    }
}
