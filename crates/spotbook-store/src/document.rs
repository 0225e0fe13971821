use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};

/// Address of one document: a collection path plus a document id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Full slash-separated path (`users/u1/spots/abc`).
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

impl fmt::Debug for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocRef({})", self.path())
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// A document as read back from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub reference: DocRef,
    pub data: Value,
}

impl Document {
    pub fn id(&self) -> &str {
        &self.reference.id
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Query predicate operators understood by document stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueryOp {
    /// The field is present and equal to the value.
    Equal,
}

impl QueryOp {
    fn matches(self, field: Option<&Value>, value: &Value) -> bool {
        match self {
            Self::Equal => field == Some(value),
        }
    }
}

/// A single mutation inside a [`WriteBatch`].
#[derive(Clone, Debug, PartialEq)]
pub enum Write {
    /// Create or fully overwrite a document.
    Set { doc: DocRef, data: Value },
    /// Add values to an array field, skipping ones already present.
    /// Creates the document (and the field) if missing.
    ArrayUnion {
        doc: DocRef,
        field: String,
        values: Vec<Value>,
    },
    /// Remove every occurrence of the values from an array field.
    /// A missing document or field is left alone.
    ArrayRemove {
        doc: DocRef,
        field: String,
        values: Vec<Value>,
    },
    /// Delete a document. Deleting a missing document is a no-op.
    Delete { doc: DocRef },
}

impl Write {
    pub fn doc(&self) -> &DocRef {
        match self {
            Self::Set { doc, .. }
            | Self::ArrayUnion { doc, .. }
            | Self::ArrayRemove { doc, .. }
            | Self::Delete { doc } => doc,
        }
    }
}

/// An ordered group of writes applied all-or-nothing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, doc: DocRef, data: Value) -> &mut Self {
        self.writes.push(Write::Set { doc, data });
        self
    }

    pub fn array_union(&mut self, doc: DocRef, field: impl Into<String>, values: Vec<Value>) -> &mut Self {
        self.writes.push(Write::ArrayUnion {
            doc,
            field: field.into(),
            values,
        });
        self
    }

    pub fn array_remove(&mut self, doc: DocRef, field: impl Into<String>, values: Vec<Value>) -> &mut Self {
        self.writes.push(Write::ArrayRemove {
            doc,
            field: field.into(),
            values,
        });
        self
    }

    pub fn delete(&mut self, doc: DocRef) -> &mut Self {
        self.writes.push(Write::Delete { doc });
        self
    }

    pub fn push(&mut self, write: Write) -> &mut Self {
        self.writes.push(write);
        self
    }

    pub fn extend(&mut self, writes: impl IntoIterator<Item = Write>) -> &mut Self {
        self.writes.extend(writes);
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Collection-keyed document tree shared by the in-process backends.
///
/// `apply` stages the whole batch on a copy and only swaps it in once every
/// write has succeeded, which is what gives those backends their atomicity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Collections {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Collections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, doc: &DocRef) -> Option<Document> {
        self.collections
            .get(&doc.collection)
            .and_then(|c| c.get(&doc.id))
            .map(|data| Document {
                reference: doc.clone(),
                data: data.clone(),
            })
    }

    pub fn list(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|c| {
                c.iter()
                    .map(|(id, data)| Document {
                        reference: DocRef::new(collection, id.clone()),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn query(&self, collection: &str, field: &str, op: QueryOp, value: &Value) -> Vec<Document> {
        self.list(collection)
            .into_iter()
            .filter(|d| op.matches(d.data.get(field), value))
            .collect()
    }

    /// Collection paths that hold at least one document.
    pub fn collection_names(&self) -> Vec<String> {
        self.collections
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Total number of documents across all collections.
    pub fn len(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a batch atomically: on error `self` is left untouched.
    pub fn apply(&mut self, batch: &WriteBatch) -> StoreResult<()> {
        let mut staged = self.clone();
        for write in batch.writes() {
            staged.apply_one(write)?;
        }
        *self = staged;
        Ok(())
    }

    fn apply_one(&mut self, write: &Write) -> StoreResult<()> {
        let doc = write.doc();
        if doc.collection.is_empty() || doc.id.is_empty() || doc.id.contains('/') {
            return Err(StoreError::rejected(doc.path(), "invalid document reference"));
        }
        match write {
            Write::Set { doc, data } => {
                self.collections
                    .entry(doc.collection.clone())
                    .or_default()
                    .insert(doc.id.clone(), data.clone());
            }
            Write::ArrayUnion { doc, field, values } => {
                let data = self
                    .collections
                    .entry(doc.collection.clone())
                    .or_default()
                    .entry(doc.id.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                let array = array_field(data, field, doc)?;
                for value in values {
                    if !array.contains(value) {
                        array.push(value.clone());
                    }
                }
            }
            Write::ArrayRemove { doc, field, values } => {
                let existing = self
                    .collections
                    .get_mut(&doc.collection)
                    .and_then(|c| c.get_mut(&doc.id));
                if let Some(data) = existing {
                    if data.get(field).is_some() {
                        let array = array_field(data, field, doc)?;
                        array.retain(|v| !values.contains(v));
                    }
                }
            }
            Write::Delete { doc } => {
                if let Some(c) = self.collections.get_mut(&doc.collection) {
                    c.remove(&doc.id);
                    if c.is_empty() {
                        self.collections.remove(&doc.collection);
                    }
                }
            }
        }
        Ok(())
    }
}

fn array_field<'a>(data: &'a mut Value, field: &str, doc: &DocRef) -> StoreResult<&'a mut Vec<Value>> {
    let object = data
        .as_object_mut()
        .ok_or_else(|| StoreError::rejected(doc.path(), "document is not an object"))?;
    object
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| StoreError::rejected(doc.path(), format!("field '{field}' is not an array")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tag_row(tag: &str) -> DocRef {
        DocRef::new("users/u1/tags", tag)
    }

    #[test]
    fn set_get_and_delete() {
        let mut tree = Collections::new();
        let doc = DocRef::new("users/u1/spots", "s1");
        let mut batch = WriteBatch::new();
        batch.set(doc.clone(), json!({"name": "Cafe"}));
        tree.apply(&batch).unwrap();
        assert_eq!(tree.get(&doc).unwrap().data["name"], "Cafe");

        let mut batch = WriteBatch::new();
        batch.delete(doc.clone());
        tree.apply(&batch).unwrap();
        assert!(tree.get(&doc).is_none());
        assert!(tree.is_empty());
    }

    #[test]
    fn array_union_creates_and_dedupes() {
        let mut tree = Collections::new();
        let mut batch = WriteBatch::new();
        batch
            .array_union(tag_row("shade"), "spots", vec![json!("s1")])
            .array_union(tag_row("shade"), "spots", vec![json!("s1"), json!("s2")]);
        tree.apply(&batch).unwrap();
        assert_eq!(tree.get(&tag_row("shade")).unwrap().data, json!({"spots": ["s1", "s2"]}));
    }

    #[test]
    fn array_remove_on_missing_doc_is_noop() {
        let mut tree = Collections::new();
        let mut batch = WriteBatch::new();
        batch.array_remove(tag_row("easy"), "spots", vec![json!("s1")]);
        tree.apply(&batch).unwrap();
        assert!(tree.get(&tag_row("easy")).is_none());
    }

    #[test]
    fn array_remove_leaves_empty_row() {
        let mut tree = Collections::new();
        let mut batch = WriteBatch::new();
        batch.array_union(tag_row("shade"), "spots", vec![json!("s1")]);
        batch.array_remove(tag_row("shade"), "spots", vec![json!("s1")]);
        tree.apply(&batch).unwrap();
        assert_eq!(tree.get(&tag_row("shade")).unwrap().data, json!({"spots": []}));
    }

    #[test]
    fn failed_batch_leaves_tree_untouched() {
        let mut tree = Collections::new();
        let doc = DocRef::new("users/u1/spots", "s1");
        let mut first = WriteBatch::new();
        first.set(doc.clone(), json!({"spots": 3}));
        tree.apply(&first).unwrap();
        let before = tree.clone();

        let mut bad = WriteBatch::new();
        bad.set(DocRef::new("users/u1/spots", "s2"), json!({"name": "new"}));
        // "spots" is not an array on s1, so this write fails.
        bad.array_union(doc, "spots", vec![json!("x")]);
        assert!(tree.apply(&bad).is_err());
        assert_eq!(tree, before);
    }

    #[test]
    fn rejects_nested_ids() {
        let mut tree = Collections::new();
        let mut batch = WriteBatch::new();
        batch.set(DocRef::new("users/u1/spots", "a/b"), json!({}));
        assert!(matches!(tree.apply(&batch), Err(StoreError::Rejected { .. })));
    }

    #[test]
    fn query_by_equality() {
        let mut tree = Collections::new();
        let mut batch = WriteBatch::new();
        batch
            .set(DocRef::new("users/u1/spots", "s1"), json!({"placeId": "p1"}))
            .set(DocRef::new("users/u1/spots", "s2"), json!({"placeId": "p2"}))
            .set(DocRef::new("users/u2/spots", "s3"), json!({"placeId": "p1"}));
        tree.apply(&batch).unwrap();
        let hits = tree.query("users/u1/spots", "placeId", QueryOp::Equal, &json!("p1"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id(), "s1");
        assert_eq!(tree.collection_names().len(), 2);
    }
}
