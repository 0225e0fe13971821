//! Incremental maintenance of the per-owner inverted tag index.
//!
//! The index is a derived cache: the spots collection is authoritative and
//! [`rebuild`] can always recompute every row from a scan. Upserts keep it
//! current by folding [`TagDelta`] writes into their final atomic batch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use spotbook_store::{DocumentStore, Write, WriteBatch};
use spotbook_types::{OwnerId, SpotId, TagIndexRow};

use crate::error::{SpotError, SpotResult};
use crate::layout::{self, TAG_ROW_FIELD};

/// Tags to add to and remove from one spot's index entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagDelta {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl TagDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// One array-union or array-remove write per changed tag.
    pub fn writes(&self, owner: &OwnerId, spot: &SpotId) -> Vec<Write> {
        let member = vec![Value::String(spot.to_string())];
        let adds = self.to_add.iter().map(|tag| Write::ArrayUnion {
            doc: layout::tag_doc(owner, tag),
            field: TAG_ROW_FIELD.into(),
            values: member.clone(),
        });
        let removes = self.to_remove.iter().map(|tag| Write::ArrayRemove {
            doc: layout::tag_doc(owner, tag),
            field: TAG_ROW_FIELD.into(),
            values: member.clone(),
        });
        adds.chain(removes).collect()
    }
}

/// Partition the symmetric difference of two tag sets by direction.
pub fn diff_tags(old: &BTreeSet<String>, new: &BTreeSet<String>) -> TagDelta {
    TagDelta {
        to_add: new.difference(old).cloned().collect(),
        to_remove: old.difference(new).cloned().collect(),
    }
}

/// Derive the full index from each spot's current tags.
pub fn rebuild<'a, I>(spots: I) -> BTreeMap<String, BTreeSet<SpotId>>
where
    I: IntoIterator<Item = (&'a SpotId, &'a BTreeSet<String>)>,
{
    let mut index: BTreeMap<String, BTreeSet<SpotId>> = BTreeMap::new();
    for (spot, tags) in spots {
        for tag in tags {
            index.entry(tag.clone()).or_default().insert(spot.clone());
        }
    }
    index
}

/// A tag whose stored row disagrees with the derived index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexMismatch {
    pub tag: String,
    /// Spots carrying the tag but absent from the row.
    pub missing: Vec<SpotId>,
    /// Spots listed in the row that no longer carry the tag.
    pub extra: Vec<SpotId>,
}

/// Compare stored rows against a derived index.
///
/// Empty stored rows are not reported; an upsert that removes a tag's last
/// spot leaves its row behind with no members.
pub fn compare(
    derived: &BTreeMap<String, BTreeSet<SpotId>>,
    stored: &BTreeMap<String, TagIndexRow>,
) -> Vec<IndexMismatch> {
    let empty = BTreeSet::new();
    let tags: BTreeSet<&String> = derived.keys().chain(stored.keys()).collect();
    tags.into_iter()
        .filter_map(|tag| {
            let want = derived.get(tag).unwrap_or(&empty);
            let have = stored.get(tag).map(TagIndexRow::spot_set).unwrap_or_default();
            let missing: Vec<SpotId> = want.difference(&have).cloned().collect();
            let extra: Vec<SpotId> = have.difference(want).cloned().collect();
            if missing.is_empty() && extra.is_empty() {
                None
            } else {
                Some(IndexMismatch {
                    tag: tag.clone(),
                    missing,
                    extra,
                })
            }
        })
        .collect()
}

/// Batch that replaces every stored row with the derived index.
pub fn reindex_batch(
    owner: &OwnerId,
    derived: &BTreeMap<String, BTreeSet<SpotId>>,
    stored: &BTreeMap<String, TagIndexRow>,
) -> WriteBatch {
    let mut batch = WriteBatch::new();
    for (tag, spots) in derived {
        let row = TagIndexRow {
            spots: spots.iter().cloned().collect(),
        };
        let data = serde_json::json!({ TAG_ROW_FIELD: row.spots });
        batch.set(layout::tag_doc(owner, tag), data);
    }
    for tag in stored.keys().filter(|t| !derived.contains_key(*t)) {
        batch.delete(layout::tag_doc(owner, tag));
    }
    batch
}

/// Read access to stored index rows.
#[derive(Clone)]
pub struct TagIndex {
    docs: Arc<dyn DocumentStore>,
}

impl TagIndex {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    /// Spots carrying `tag`, according to the stored row.
    pub async fn spots_with_tag(&self, owner: &OwnerId, tag: &str) -> SpotResult<Vec<SpotId>> {
        let doc = layout::tag_doc(owner, tag);
        let Some(found) = self.docs.get(&doc).await.map_err(SpotError::Lookup)? else {
            return Ok(Vec::new());
        };
        let row: TagIndexRow = found
            .decode()
            .map_err(|e| SpotError::corrupt(doc.path(), e))?;
        Ok(row.spots)
    }

    /// Every stored row of one owner, keyed by tag.
    pub async fn rows(&self, owner: &OwnerId) -> SpotResult<BTreeMap<String, TagIndexRow>> {
        let docs = self
            .docs
            .list(&layout::tags_collection(owner))
            .await
            .map_err(SpotError::Lookup)?;
        docs.into_iter()
            .map(|d| -> SpotResult<(String, TagIndexRow)> {
                let row = d
                    .decode::<TagIndexRow>()
                    .map_err(|e| SpotError::corrupt(d.reference.path(), e))?;
                Ok((d.reference.id.clone(), row))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tags(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn id(s: &str) -> SpotId {
        SpotId::new(s).unwrap()
    }

    #[test]
    fn diff_partitions_by_direction() {
        let delta = diff_tags(&tags(&["shade", "easy"]), &tags(&["easy", "toilet"]));
        assert_eq!(delta.to_add, tags(&["toilet"]));
        assert_eq!(delta.to_remove, tags(&["shade"]));
        assert!(!delta.is_empty());
        assert!(diff_tags(&tags(&["a"]), &tags(&["a"])).is_empty());
    }

    #[test]
    fn writes_target_tag_rows() {
        let owner = OwnerId::new("u1").unwrap();
        let delta = diff_tags(&tags(&["shade"]), &tags(&["easy"]));
        let writes = delta.writes(&owner, &id("s1"));
        assert_eq!(writes.len(), 2);
        assert!(matches!(&writes[0], Write::ArrayUnion { doc, .. } if doc.path() == "users/u1/tags/easy"));
        assert!(matches!(&writes[1], Write::ArrayRemove { doc, .. } if doc.path() == "users/u1/tags/shade"));
    }

    #[test]
    fn rebuild_and_compare() {
        let s1 = id("s1");
        let s2 = id("s2");
        let t1 = tags(&["shade", "easy"]);
        let t2 = tags(&["easy"]);
        let derived = rebuild([(&s1, &t1), (&s2, &t2)]);
        assert_eq!(derived["easy"].len(), 2);

        let mut stored = BTreeMap::new();
        stored.insert("easy".to_string(), TagIndexRow { spots: vec![s1.clone()] });
        stored.insert("shade".to_string(), TagIndexRow { spots: vec![s1.clone()] });
        stored.insert("toilet".to_string(), TagIndexRow { spots: vec![s2.clone()] });
        stored.insert("picnic".to_string(), TagIndexRow::default());

        let mismatches = compare(&derived, &stored);
        assert_eq!(
            mismatches,
            vec![
                IndexMismatch { tag: "easy".into(), missing: vec![s2.clone()], extra: vec![] },
                IndexMismatch { tag: "toilet".into(), missing: vec![], extra: vec![s2.clone()] },
            ]
        );

        let owner = OwnerId::new("u1").unwrap();
        let batch = reindex_batch(&owner, &derived, &stored);
        // two rows rewritten, two stale rows deleted
        assert_eq!(batch.len(), 4);
    }

    proptest! {
        #[test]
        fn applying_delta_yields_new_set(
            old in proptest::collection::btree_set("[a-e]", 0..5),
            new in proptest::collection::btree_set("[a-e]", 0..5),
        ) {
            let delta = diff_tags(&old, &new);
            prop_assert!(delta.to_add.is_disjoint(&delta.to_remove));
            let mut applied: BTreeSet<String> = old.difference(&delta.to_remove).cloned().collect();
            applied.extend(delta.to_add.iter().cloned());
            prop_assert_eq!(applied, new);
        }
    }
}
