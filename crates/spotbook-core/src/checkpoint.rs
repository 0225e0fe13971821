use std::sync::Arc;

use serde::Serialize;
use spotbook_store::{DocRef, DocumentStore, Write, WriteBatch};
use spotbook_types::{Checkpoint, OwnerId};
use tracing::{debug, warn};

use crate::error::{SpotError, SpotResult};
use crate::layout;

/// A checkpoint still present in the log, with its document id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PendingCheckpoint {
    pub id: String,
    pub checkpoint: Checkpoint,
}

/// Per-owner log of upsert intent.
///
/// `record` runs before any blob is touched; the matching delete rides in
/// the upsert's final batch. Entries left behind are never cleaned up
/// automatically: they are listed for inspection and removed only by an
/// explicit [`CheckpointLog::discard`].
#[derive(Clone)]
pub struct CheckpointLog {
    docs: Arc<dyn DocumentStore>,
}

impl CheckpointLog {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    /// Persist a checkpoint and return its reference.
    pub async fn record(&self, owner: &OwnerId, checkpoint: &Checkpoint) -> SpotResult<DocRef> {
        let collection = layout::checkpoints_collection(owner);
        let doc = DocRef::new(collection.clone(), self.docs.new_id(&collection));
        let data = serde_json::to_value(checkpoint)
            .map_err(|e| SpotError::corrupt(doc.path(), e))?;
        let mut batch = WriteBatch::new();
        batch.set(doc.clone(), data);
        self.docs.apply_batch(batch).await.map_err(SpotError::Commit)?;
        debug!(%owner, checkpoint = %doc.id, spot_id = %checkpoint.spot_id, "checkpoint written");
        Ok(doc)
    }

    /// The write that retires a checkpoint inside a final batch.
    pub fn clear(doc: &DocRef) -> Write {
        Write::Delete { doc: doc.clone() }
    }

    /// Every checkpoint still present for `owner`, oldest first.
    ///
    /// Outside a running upsert each of these is orphaned: its operation
    /// stopped between the checkpoint write and the final commit.
    pub async fn list(&self, owner: &OwnerId) -> SpotResult<Vec<PendingCheckpoint>> {
        let docs = self
            .docs
            .list(&layout::checkpoints_collection(owner))
            .await
            .map_err(SpotError::Lookup)?;
        let mut pending = docs
            .into_iter()
            .map(|d| -> SpotResult<PendingCheckpoint> {
                let checkpoint = d
                    .decode::<Checkpoint>()
                    .map_err(|e| SpotError::corrupt(d.reference.path(), e))?;
                Ok(PendingCheckpoint {
                    id: d.reference.id,
                    checkpoint,
                })
            })
            .collect::<SpotResult<Vec<_>>>()?;
        pending.sort_by(|a, b| a.checkpoint.timestamp.cmp(&b.checkpoint.timestamp));
        if !pending.is_empty() {
            warn!(%owner, count = pending.len(), "orphaned checkpoints present");
        }
        Ok(pending)
    }

    /// Remove one checkpoint by id. Returns `false` if it did not exist.
    pub async fn discard(&self, owner: &OwnerId, id: &str) -> SpotResult<bool> {
        let doc = DocRef::new(layout::checkpoints_collection(owner), id);
        let exists = self
            .docs
            .get(&doc)
            .await
            .map_err(SpotError::Lookup)?
            .is_some();
        if !exists {
            return Ok(false);
        }
        let mut batch = WriteBatch::new();
        batch.delete(doc);
        self.docs.apply_batch(batch).await.map_err(SpotError::Commit)?;
        debug!(%owner, checkpoint = id, "checkpoint discarded");
        Ok(true)
    }
}
