//! In-memory stores for tests and embedding.
//!
//! Both stores keep their data behind a `RwLock` and count every mutation
//! they accept, so tests can assert that an operation performed no writes.
//! Faults can be injected to exercise the coordinator's failure paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::document::{Collections, DocRef, Document, QueryOp, WriteBatch};
use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobStore, DocumentStore};

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// In-memory document store.
pub struct InMemoryDocumentStore {
    tree: RwLock<Collections>,
    fail_at_batch: AtomicUsize,
    fail_reads: AtomicBool,
    batches_applied: AtomicUsize,
}

impl InMemoryDocumentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Collections::new()),
            fail_at_batch: AtomicUsize::new(usize::MAX),
            fail_reads: AtomicBool::new(false),
            batches_applied: AtomicUsize::new(0),
        }
    }

    /// Make the next `apply_batch` call fail with a transport error.
    pub fn fail_next_batch(&self) {
        self.fail_batch_after(0);
    }

    /// Let `successes` more batches through, then fail the one after.
    pub fn fail_batch_after(&self, successes: usize) {
        let at = self.batches_applied() + successes;
        self.fail_at_batch.store(at, Ordering::SeqCst);
    }

    /// Make every read and query fail until reset.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of batches successfully applied so far.
    pub fn batches_applied(&self) -> usize {
        self.batches_applied.load(Ordering::SeqCst)
    }

    /// Synchronous read for assertions.
    pub fn snapshot(&self, doc: &DocRef) -> Option<Value> {
        self.tree
            .read()
            .expect("lock poisoned")
            .get(doc)
            .map(|d| d.data)
    }

    /// Number of documents in one collection.
    pub fn count(&self, collection: &str) -> usize {
        self.tree.read().expect("lock poisoned").list(collection).len()
    }

    /// Total number of documents across all collections.
    pub fn len(&self) -> usize {
        self.tree.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed a document directly, bypassing batching and counters.
    pub fn insert(&self, doc: DocRef, data: Value) {
        let mut batch = WriteBatch::new();
        batch.set(doc, data);
        self.tree
            .write()
            .expect("lock poisoned")
            .apply(&batch)
            .expect("seeding a plain set cannot fail");
    }

    fn check_reads(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, doc: &DocRef) -> StoreResult<Option<Document>> {
        self.check_reads()?;
        Ok(self.tree.read().expect("lock poisoned").get(doc))
    }

    async fn query(
        &self,
        collection: &str,
        field: &str,
        op: QueryOp,
        value: &Value,
    ) -> StoreResult<Vec<Document>> {
        self.check_reads()?;
        Ok(self
            .tree
            .read()
            .expect("lock poisoned")
            .query(collection, field, op, value))
    }

    async fn list(&self, collection: &str) -> StoreResult<Vec<Document>> {
        self.check_reads()?;
        Ok(self.tree.read().expect("lock poisoned").list(collection))
    }

    async fn apply_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let at = self.batches_applied.load(Ordering::SeqCst);
        let injected = self
            .fail_at_batch
            .compare_exchange(at, usize::MAX, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected batch failure".into()));
        }
        self.tree.write().expect("lock poisoned").apply(&batch)?;
        self.batches_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDocumentStore")
            .field("document_count", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Blobs
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct StoredBlob {
    bytes: Bytes,
    content_type: String,
}

/// In-memory blob store.
///
/// With a latency configured, every put and delete sleeps before completing,
/// and the store records the highest number of calls in flight at once.
pub struct InMemoryBlobStore {
    blobs: RwLock<BTreeMap<String, StoredBlob>>,
    latency: Option<Duration>,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryBlobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            latency: None,
            fail_puts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Create a store whose mutations each take `latency` to complete.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::new()
        }
    }

    /// Make uploads fail with a transport error until reset.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make deletes of existing blobs fail with a transport error until reset.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful uploads.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of successful deletes.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Highest number of mutations observed in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.blobs.read().expect("lock poisoned").contains_key(path)
    }

    pub fn read(&self, path: &str) -> Option<Bytes> {
        self.blobs
            .read()
            .expect("lock poisoned")
            .get(path)
            .map(|b| b.bytes.clone())
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.blobs
            .read()
            .expect("lock poisoned")
            .get(path)
            .map(|b| b.content_type.clone())
    }

    /// Sorted paths of every stored blob.
    pub fn paths(&self) -> Vec<String> {
        self.blobs.read().expect("lock poisoned").keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed a blob directly, bypassing counters.
    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Bytes>) {
        self.blobs.write().expect("lock poisoned").insert(
            path.into(),
            StoredBlob {
                bytes: bytes.into(),
                content_type: "application/octet-stream".into(),
            },
        );
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn download_url(path: &str) -> String {
        format!("memory://{path}")
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> StoreResult<String> {
        self.simulate_latency().await;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("injected upload failure: {path}")));
        }
        self.blobs.write().expect("lock poisoned").insert(
            path.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(Self::download_url(path))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.simulate_latency().await;
        let mut blobs = self.blobs.write().expect("lock poisoned");
        if !blobs.contains_key(path) {
            return Err(StoreError::not_found(path));
        }
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("injected delete failure: {path}")));
        }
        blobs.remove(path);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        Ok(self.contains(path))
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .blobs
            .read()
            .expect("lock poisoned")
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect())
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn batch_then_get() {
        let store = InMemoryDocumentStore::new();
        let doc = DocRef::new("users/u1/spots", "s1");
        let mut batch = WriteBatch::new();
        batch.set(doc.clone(), json!({"name": "Cafe"}));
        store.apply_batch(batch).await.unwrap();

        let read = store.get(&doc).await.unwrap().expect("should exist");
        assert_eq!(read.data["name"], "Cafe");
        assert_eq!(store.batches_applied(), 1);
    }

    #[tokio::test]
    async fn injected_batch_failure_applies_nothing() {
        let store = InMemoryDocumentStore::new();
        store.fail_next_batch();
        let mut batch = WriteBatch::new();
        batch.set(DocRef::new("users/u1/spots", "s1"), json!({}));
        let err = store.apply_batch(batch.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.is_empty());
        assert_eq!(store.batches_applied(), 0);

        // Only the next batch fails.
        store.apply_batch(batch).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn delayed_batch_failure() {
        let store = InMemoryDocumentStore::new();
        store.fail_batch_after(1);
        let mut first = WriteBatch::new();
        first.set(DocRef::new("c", "a"), json!({}));
        let mut second = WriteBatch::new();
        second.set(DocRef::new("c", "b"), json!({}));

        store.apply_batch(first).await.unwrap();
        assert!(store.apply_batch(second.clone()).await.is_err());
        store.apply_batch(second).await.unwrap();
        assert_eq!(store.count("c"), 2);
    }

    #[tokio::test]
    async fn injected_read_failure() {
        let store = InMemoryDocumentStore::new();
        store.fail_reads(true);
        assert!(store.get(&DocRef::new("c", "d")).await.is_err());
        assert!(store
            .query("c", "f", QueryOp::Equal, &json!(1))
            .await
            .is_err());
        store.fail_reads(false);
        assert!(store.get(&DocRef::new("c", "d")).await.unwrap().is_none());
    }

    #[test]
    fn new_ids_are_distinct() {
        let store = InMemoryDocumentStore::new();
        let a = store.new_id("users/u1/spots");
        let b = store.new_id("users/u1/spots");
        assert_ne!(a, b);
        assert!(!a.contains('-'));
    }

    // -----------------------------------------------------------------------
    // Blobs
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn put_and_delete() {
        let store = InMemoryBlobStore::new();
        let url = store
            .put("users/u1/spots/p1/1.png", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();
        assert_eq!(url, "memory://users/u1/spots/p1/1.png");
        assert!(store.exists("users/u1/spots/p1/1.png").await.unwrap());
        assert_eq!(store.content_type("users/u1/spots/p1/1.png").as_deref(), Some("image/png"));

        store.delete("users/u1/spots/p1/1.png").await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.put_count(), 1);
        assert_eq!(store.delete_count(), 1);
    }

    #[tokio::test]
    async fn delete_missing_reports_not_found() {
        let store = InMemoryBlobStore::new();
        let err = store.delete("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn injected_put_failure() {
        let store = InMemoryBlobStore::new();
        store.fail_puts(true);
        let err = store.put("a", Bytes::new(), "image/png").await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn list_by_prefix() {
        let store = InMemoryBlobStore::new();
        store.insert("users/u1/spots/p1/1.png", &b"a"[..]);
        store.insert("users/u1/spots/p2/2.png", &b"b"[..]);
        store.insert("users/u2/spots/p1/3.png", &b"c"[..]);
        let listed = store.list("users/u1/").await.unwrap();
        assert_eq!(listed, vec!["users/u1/spots/p1/1.png", "users/u1/spots/p2/2.png"]);
    }

    #[tokio::test]
    async fn latency_tracks_concurrency() {
        let store = InMemoryBlobStore::with_latency(Duration::from_millis(5));
        let puts = (0..4).map(|i| {
            let path = format!("p/{i}.png");
            let store = &store;
            async move { store.put(&path, Bytes::new(), "image/png").await }
        });
        for result in futures::future::join_all(puts).await {
            result.unwrap();
        }
        assert_eq!(store.max_in_flight(), 4);
        assert_eq!(store.put_count(), 4);
    }
}
