use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::identity::SpotId;

/// One row of the inverted tag index: every spot carrying a tag.
///
/// Derived data. The spots collection is the system of record and the
/// index can always be rebuilt by scanning it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagIndexRow {
    #[serde(default)]
    pub spots: Vec<SpotId>,
}

impl TagIndexRow {
    pub fn contains(&self, spot: &SpotId) -> bool {
        self.spots.contains(spot)
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    /// The row's spot ids as a set, for order-insensitive comparison.
    pub fn spot_set(&self) -> BTreeSet<SpotId> {
        self.spots.iter().cloned().collect()
    }
}

/// Normalize free-text tags: trim whitespace, drop empties, deduplicate.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
