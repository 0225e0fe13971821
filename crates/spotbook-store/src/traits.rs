use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::document::{DocRef, Document, QueryOp, WriteBatch};
use crate::error::StoreResult;

/// Document store holding spots, tag index rows, and checkpoints.
///
/// All implementations must satisfy these invariants:
/// - `apply_batch` is atomic: every write lands or none does.
/// - Reads never observe a partially applied batch.
/// - Transport failures are returned as errors, never swallowed.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document. Returns `Ok(None)` if it does not exist.
    async fn get(&self, doc: &DocRef) -> StoreResult<Option<Document>>;

    /// Return every document in `collection` whose `field` satisfies `op`.
    async fn query(
        &self,
        collection: &str,
        field: &str,
        op: QueryOp,
        value: &Value,
    ) -> StoreResult<Vec<Document>>;

    /// Return every document in `collection`.
    async fn list(&self, collection: &str) -> StoreResult<Vec<Document>>;

    /// Apply a batch of writes atomically.
    async fn apply_batch(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Allocate a fresh document id for `collection`.
    ///
    /// Ids are generated client-side and never collide in practice; the
    /// default produces a time-ordered UUID v7 in simple (hyphen-free) form.
    fn new_id(&self, _collection: &str) -> String {
        uuid::Uuid::now_v7().simple().to_string()
    }
}

/// Blob store holding uploaded images by path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `bytes` at `path`, replacing any existing blob, and return a
    /// retrievable download reference for it.
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> StoreResult<String>;

    /// Delete the blob at `path`.
    ///
    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) when
    /// nothing is stored there so callers can treat it as already done.
    async fn delete(&self, path: &str) -> StoreResult<()>;

    /// Check whether a blob exists at `path`.
    async fn exists(&self, path: &str) -> StoreResult<bool>;

    /// List the paths of all blobs under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;
}
