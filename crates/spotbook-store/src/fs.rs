//! Filesystem-backed stores.
//!
//! [`FsDocumentStore`] keeps every collection in one JSON file. A batch is
//! staged in memory, written to a sibling temp file, and renamed over the
//! original, so the file always holds either the old or the new state.
//!
//! [`FsBlobStore`] maps blob paths onto files below a root directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::document::{Collections, DocRef, Document, QueryOp, WriteBatch};
use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobStore, DocumentStore};

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// JSON-file document store.
#[derive(Debug)]
pub struct FsDocumentStore {
    path: PathBuf,
    tree: Mutex<Collections>,
}

impl FsDocumentStore {
    /// Open (or create) a document file at the given path.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tree = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Collections::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "document store opened");
        Ok(Self {
            path,
            tree: Mutex::new(tree),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, tree: &Collections) -> StoreResult<()> {
        let raw = serde_json::to_vec_pretty(tree)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn get(&self, doc: &DocRef) -> StoreResult<Option<Document>> {
        Ok(self.tree.lock().await.get(doc))
    }

    async fn query(
        &self,
        collection: &str,
        field: &str,
        op: QueryOp,
        value: &Value,
    ) -> StoreResult<Vec<Document>> {
        Ok(self.tree.lock().await.query(collection, field, op, value))
    }

    async fn list(&self, collection: &str) -> StoreResult<Vec<Document>> {
        Ok(self.tree.lock().await.list(collection))
    }

    async fn apply_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut tree = self.tree.lock().await;
        let mut staged = tree.clone();
        staged.apply(&batch)?;
        self.persist(&staged).await?;
        *tree = staged;
        debug!(writes = batch.len(), "batch committed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Blobs
// ---------------------------------------------------------------------------

/// Directory-tree blob store.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (or create) a blob directory.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let root = tokio::fs::canonicalize(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a blob path below the root, rejecting escapes.
    fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || path.trim_start_matches('/').is_empty() {
            return Err(StoreError::rejected(path, "blob path must be relative and normalized"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: Bytes, _content_type: &str) -> StoreResult<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = target.with_extension("upload.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &target).await?;
        debug!(path, len = bytes.len(), "blob stored");
        Ok(format!("file://{}", target.display()))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::not_found(path)),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let target = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&target).await?)
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) && !key.ends_with(".tmp") {
                    found.push(key);
                }
            }
        }
        found.sort();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn documents_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.json");
        let doc = DocRef::new("users/u1/spots", "s1");
        {
            let store = FsDocumentStore::open(&path).await.unwrap();
            let mut batch = WriteBatch::new();
            batch
                .set(doc.clone(), json!({"name": "Cafe"}))
                .array_union(DocRef::new("users/u1/tags", "shade"), "spots", vec![json!("s1")]);
            store.apply_batch(batch).await.unwrap();
        }
        let reopened = FsDocumentStore::open(&path).await.unwrap();
        let read = reopened.get(&doc).await.unwrap().expect("should persist");
        assert_eq!(read.data["name"], "Cafe");
        assert_eq!(reopened.list("users/u1/tags").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejected_batch_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.json");
        let store = FsDocumentStore::open(&path).await.unwrap();
        let mut batch = WriteBatch::new();
        batch
            .set(DocRef::new("users/u1/spots", "s1"), json!({}))
            .set(DocRef::new("users/u1/spots", ""), json!({}));
        assert!(store.apply_batch(batch).await.is_err());
        assert!(store.list("users/u1/spots").await.unwrap().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn blobs_put_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path().join("blobs")).await.unwrap();
        let url = store
            .put("users/u1/spots/p1/12.png", Bytes::from_static(b"img"), "image/png")
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        store
            .put("users/u1/spots/p2/13.png", Bytes::from_static(b"img"), "image/png")
            .await
            .unwrap();

        assert_eq!(
            store.list("users/u1/spots/p1/").await.unwrap(),
            vec!["users/u1/spots/p1/12.png"]
        );
        assert!(store.exists("users/u1/spots/p1/12.png").await.unwrap());

        store.delete("users/u1/spots/p1/12.png").await.unwrap();
        let again = store.delete("users/u1/spots/p1/12.png").await.unwrap_err();
        assert!(again.is_not_found());
    }

    #[tokio::test]
    async fn blob_paths_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).await.unwrap();
        let err = store
            .put("../outside.png", Bytes::new(), "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
    }
}
