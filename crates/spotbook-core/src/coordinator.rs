//! The spot upsert/delete coordinator.
//!
//! Every create and edit walks the same states:
//!
//! ```text
//! Validating -> CheckpointWritten -> ReconcilingStorage -> Committing -> Done
//!      \               \                    \                  \
//!       +---------------+--------------------+------------------+--> Failed
//! ```
//!
//! Nothing in the document store changes before `Committing` except the
//! checkpoint itself. `Committing` is one atomic batch that writes the spot,
//! applies the tag index delta, and deletes the checkpoint. Deletes skip the
//! checkpoint: they only remove data.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use spotbook_store::{BlobStore, DocumentStore, WriteBatch};
use spotbook_types::{
    normalize_tags, Category, Checkpoint, Icon, OwnerId, PlaceId, Session, Spot, SpotId,
};
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointLog;
use crate::config::CoordinatorConfig;
use crate::error::{SpotError, SpotResult};
use crate::identity::IdentityResolver;
use crate::images::{ImageReconciler, ImageSource};
use crate::layout;
use crate::tag_index::{diff_tags, TagIndex};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Progress of one coordinator operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpsertState {
    Validating,
    CheckpointWritten,
    ReconcilingStorage,
    Committing,
    Done,
    Failed,
}

impl fmt::Display for UpsertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validating => "validating",
            Self::CheckpointWritten => "checkpoint-written",
            Self::ReconcilingStorage => "reconciling-storage",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operation {
    Create,
    Edit,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
        })
    }
}

/// Tracks the state of one running operation and logs every transition.
struct Run {
    op: Operation,
    history: Vec<UpsertState>,
}

impl Run {
    fn start(op: Operation) -> Self {
        debug!(%op, state = %UpsertState::Validating, "operation started");
        Self {
            op,
            history: vec![UpsertState::Validating],
        }
    }

    fn state(&self) -> UpsertState {
        self.history.last().copied().unwrap_or(UpsertState::Validating)
    }

    fn advance(&mut self, next: UpsertState) {
        debug!(op = %self.op, from = %self.state(), to = %next, "state transition");
        self.history.push(next);
    }

    fn finish<T>(mut self, result: SpotResult<T>) -> SpotResult<(T, Vec<UpsertState>)> {
        match result {
            Ok(value) => {
                self.advance(UpsertState::Done);
                Ok((value, self.history))
            }
            Err(e) => {
                warn!(op = %self.op, failed_in = %self.state(), kind = %e.kind(), error = %e, "operation failed");
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs and receipts
// ---------------------------------------------------------------------------

/// Caller-supplied spot fields, as collected by a form.
///
/// Required fields are optional here so the coordinator, not the caller,
/// decides what "missing" means.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpotDraft {
    pub place_id: String,
    pub name: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub category: Option<Category>,
    pub icon: Option<Icon>,
    pub tags: Vec<String>,
    pub notes: String,
    /// Desired images in display order.
    pub images: Vec<ImageSource>,
}

impl SpotDraft {
    /// A draft with every required field set.
    pub fn new(
        place_id: impl Into<String>,
        name: impl Into<String>,
        lat: f64,
        lng: f64,
        category: Category,
        icon: Icon,
    ) -> Self {
        Self {
            place_id: place_id.into(),
            name: name.into(),
            lat: Some(lat),
            lng: Some(lng),
            category: Some(category),
            icon: Some(icon),
            ..Self::default()
        }
    }

    /// Draft pre-filled from an existing spot, keeping all of its images.
    pub fn from_spot(spot: &Spot) -> Self {
        Self {
            place_id: spot.place_id.to_string(),
            name: spot.name.clone(),
            lat: Some(spot.lat),
            lng: Some(spot.lng),
            category: Some(spot.category),
            icon: Some(spot.icon),
            tags: spot.tags.iter().cloned().collect(),
            notes: spot.notes.clone(),
            images: spot
                .images
                .iter()
                .map(|i| ImageSource::keep(&i.storage_path))
                .collect(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_images(mut self, images: Vec<ImageSource>) -> Self {
        self.images = images;
        self
    }
}

/// A draft whose required fields have all been checked.
struct ValidDraft {
    place_id: PlaceId,
    name: String,
    lat: f64,
    lng: f64,
    category: Category,
    icon: Icon,
    tags: BTreeSet<String>,
    notes: String,
    images: Vec<ImageSource>,
}

impl ValidDraft {
    fn into_spot(
        self,
        id: SpotId,
        images: Vec<spotbook_types::Image>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Spot {
        Spot {
            id,
            place_id: self.place_id,
            name: self.name,
            lat: self.lat,
            lng: self.lng,
            category: self.category,
            icon: self.icon,
            tags: self.tags,
            notes: self.notes,
            images,
            created_at,
            updated_at,
        }
    }
}

/// What a successful create or edit did.
#[derive(Clone, Debug, PartialEq)]
pub struct UpsertReceipt {
    /// The spot exactly as committed.
    pub spot: Spot,
    /// Blob paths uploaded by this call.
    pub uploaded: Vec<String>,
    /// Blob paths deleted (or found already absent) by this call.
    pub deleted: Vec<String>,
    /// States visited, ending in `Done`.
    pub states: Vec<UpsertState>,
}

/// What a successful delete did.
#[derive(Clone, Debug, PartialEq)]
pub struct DeleteReceipt {
    /// The spot as it was before removal.
    pub spot: Spot,
    pub deleted: Vec<String>,
    pub states: Vec<UpsertState>,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Keeps spot documents, the tag index, and image blobs consistent across
/// the document store and the blob store.
#[derive(Clone)]
pub struct SpotCoordinator {
    docs: Arc<dyn DocumentStore>,
    identity: IdentityResolver,
    images: ImageReconciler,
    checkpoints: CheckpointLog,
    tags: TagIndex,
}

impl SpotCoordinator {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        config: CoordinatorConfig,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            identity: IdentityResolver::new(docs.clone()),
            images: ImageReconciler::new(blobs, config),
            checkpoints: CheckpointLog::new(docs.clone()),
            tags: TagIndex::new(docs.clone()),
            docs,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointLog {
        &self.checkpoints
    }

    pub fn tag_index(&self) -> &TagIndex {
        &self.tags
    }

    // ---- Reads ----

    /// Load one spot of the session's owner.
    pub async fn get(&self, session: &Session, spot: &SpotId) -> SpotResult<Option<Spot>> {
        let owner = require_owner(session)?;
        self.load(owner, spot).await
    }

    /// Every spot of the session's owner, oldest first.
    pub async fn list(&self, session: &Session) -> SpotResult<Vec<Spot>> {
        let owner = require_owner(session)?;
        let docs = self
            .docs
            .list(&layout::spots_collection(owner))
            .await
            .map_err(SpotError::Lookup)?;
        let mut spots = docs
            .into_iter()
            .map(|d| decode_spot(&d.reference.id, d.data, &d.reference.path()))
            .collect::<SpotResult<Vec<_>>>()?;
        spots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(spots)
    }

    /// Spot ids carrying `tag`, via the tag index.
    pub async fn spots_with_tag(&self, session: &Session, tag: &str) -> SpotResult<Vec<SpotId>> {
        let owner = require_owner(session)?;
        self.tags.spots_with_tag(owner, tag.trim()).await
    }

    async fn load(&self, owner: &OwnerId, spot: &SpotId) -> SpotResult<Option<Spot>> {
        let doc = layout::spot_doc(owner, spot);
        match self.docs.get(&doc).await.map_err(SpotError::Lookup)? {
            Some(found) => decode_spot(spot.as_str(), found.data, &doc.path()).map(Some),
            None => Ok(None),
        }
    }

    // ---- Create ----

    /// Create a new spot.
    pub async fn create(&self, session: &Session, draft: SpotDraft) -> SpotResult<UpsertReceipt> {
        let mut run = Run::start(Operation::Create);
        let result = self.create_inner(session, draft, &mut run).await;
        let (mut receipt, states) = run.finish(result)?;
        receipt.states = states;
        info!(
            spot_id = %receipt.spot.id,
            place_id = %receipt.spot.place_id,
            uploaded = receipt.uploaded.len(),
            "spot created"
        );
        Ok(receipt)
    }

    async fn create_inner(
        &self,
        session: &Session,
        draft: SpotDraft,
        run: &mut Run,
    ) -> SpotResult<UpsertReceipt> {
        // Validating
        let owner = require_owner(session)?;
        let mut draft = validate(draft)?;
        self.identity
            .check_unique(owner, &draft.place_id, None)
            .await?;
        let collection = layout::spots_collection(owner);
        let spot_id = SpotId::new(self.docs.new_id(&collection))
            .map_err(|e| SpotError::precondition(e.to_string()))?;
        let desired = std::mem::take(&mut draft.images);
        let plan = {
            let mut rng = rand::thread_rng();
            self.images.plan(owner, &draft.place_id, &[], desired, &mut rng)?
        };
        let timestamp = Utc::now();

        run.advance(UpsertState::CheckpointWritten);
        let checkpoint = self
            .checkpoints
            .record(
                owner,
                &Checkpoint::for_create(spot_id.clone(), draft.place_id.clone(), timestamp),
            )
            .await?;

        run.advance(UpsertState::ReconcilingStorage);
        let outcome = self.images.execute(plan).await?;

        run.advance(UpsertState::Committing);
        let spot = draft.into_spot(spot_id, outcome.images, timestamp, timestamp);
        let delta = diff_tags(&BTreeSet::new(), &spot.tags);
        let mut batch = WriteBatch::new();
        batch
            .set(layout::spot_doc(owner, &spot.id), encode_spot(&spot)?)
            .extend(delta.writes(owner, &spot.id))
            .push(CheckpointLog::clear(&checkpoint));
        self.docs.apply_batch(batch).await.map_err(SpotError::Commit)?;

        Ok(UpsertReceipt {
            spot,
            uploaded: outcome.uploaded,
            deleted: outcome.deleted,
            states: Vec::new(),
        })
    }

    // ---- Edit ----

    /// Overwrite an existing spot with the draft's fields and images.
    pub async fn edit(
        &self,
        session: &Session,
        editing: &SpotId,
        draft: SpotDraft,
    ) -> SpotResult<UpsertReceipt> {
        let mut run = Run::start(Operation::Edit);
        let result = self.edit_inner(session, editing, draft, &mut run).await;
        let (mut receipt, states) = run.finish(result)?;
        receipt.states = states;
        info!(
            spot_id = %receipt.spot.id,
            uploaded = receipt.uploaded.len(),
            deleted = receipt.deleted.len(),
            "spot updated"
        );
        Ok(receipt)
    }

    async fn edit_inner(
        &self,
        session: &Session,
        editing: &SpotId,
        draft: SpotDraft,
        run: &mut Run,
    ) -> SpotResult<UpsertReceipt> {
        // Validating
        let owner = require_owner(session)?;
        let existing = self
            .load(owner, editing)
            .await?
            .ok_or_else(|| SpotError::precondition(format!("spot {editing} does not exist")))?;
        let mut draft = validate(draft)?;
        if draft.place_id != existing.place_id {
            self.identity
                .check_unique(owner, &draft.place_id, Some(editing))
                .await?;
        }
        let desired = std::mem::take(&mut draft.images);
        let plan = {
            let mut rng = rand::thread_rng();
            self.images
                .plan(owner, &draft.place_id, &existing.images, desired, &mut rng)?
        };
        let timestamp = Utc::now();

        run.advance(UpsertState::CheckpointWritten);
        let checkpoint = self
            .checkpoints
            .record(
                owner,
                &Checkpoint::for_edit(
                    editing.clone(),
                    draft.place_id.clone(),
                    existing.place_id.clone(),
                    timestamp,
                ),
            )
            .await?;

        run.advance(UpsertState::ReconcilingStorage);
        let outcome = self.images.execute(plan).await?;

        run.advance(UpsertState::Committing);
        let spot = draft.into_spot(
            existing.id.clone(),
            outcome.images,
            existing.created_at,
            timestamp,
        );
        let delta = diff_tags(&existing.tags, &spot.tags);
        let mut batch = WriteBatch::new();
        batch
            .set(layout::spot_doc(owner, &spot.id), encode_spot(&spot)?)
            .extend(delta.writes(owner, &spot.id))
            .push(CheckpointLog::clear(&checkpoint));
        self.docs.apply_batch(batch).await.map_err(SpotError::Commit)?;

        Ok(UpsertReceipt {
            spot,
            uploaded: outcome.uploaded,
            deleted: outcome.deleted,
            states: Vec::new(),
        })
    }

    // ---- Delete ----

    /// Delete a spot, its images, and its tag index entries.
    pub async fn delete(&self, session: &Session, spot: &SpotId) -> SpotResult<DeleteReceipt> {
        let mut run = Run::start(Operation::Delete);
        let result = self.delete_inner(session, spot, &mut run).await;
        let (mut receipt, states) = run.finish(result)?;
        receipt.states = states;
        info!(spot_id = %receipt.spot.id, deleted = receipt.deleted.len(), "spot deleted");
        Ok(receipt)
    }

    async fn delete_inner(
        &self,
        session: &Session,
        spot_id: &SpotId,
        run: &mut Run,
    ) -> SpotResult<DeleteReceipt> {
        let owner = require_owner(session)?;
        let spot = self
            .load(owner, spot_id)
            .await?
            .ok_or_else(|| SpotError::precondition(format!("spot {spot_id} does not exist")))?;

        run.advance(UpsertState::ReconcilingStorage);
        let paths: Vec<String> = spot.images.iter().map(|i| i.storage_path.clone()).collect();
        self.images.delete_all(&paths).await?;

        run.advance(UpsertState::Committing);
        let delta = diff_tags(&spot.tags, &BTreeSet::new());
        let mut batch = WriteBatch::new();
        batch
            .delete(layout::spot_doc(owner, &spot.id))
            .extend(delta.writes(owner, &spot.id));
        self.docs.apply_batch(batch).await.map_err(SpotError::Commit)?;

        Ok(DeleteReceipt {
            spot,
            deleted: paths,
            states: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn require_owner(session: &Session) -> SpotResult<&OwnerId> {
    let owner = session
        .current_owner()
        .ok_or_else(|| SpotError::precondition("no authenticated owner"))?;
    if owner.as_str().contains('/') {
        return Err(SpotError::precondition(format!("malformed owner id {owner}")));
    }
    Ok(owner)
}

fn validate(draft: SpotDraft) -> SpotResult<ValidDraft> {
    let place_id = PlaceId::new(draft.place_id.trim())
        .map_err(|_| SpotError::precondition("place id is required"))?;
    if place_id.as_str().contains('/') || matches!(place_id.as_str(), "." | "..") {
        return Err(SpotError::precondition(format!("malformed place id {place_id}")));
    }
    let name = draft.name.trim().to_string();
    if name.is_empty() {
        return Err(SpotError::precondition("name is required"));
    }
    let (Some(lat), Some(lng)) = (draft.lat, draft.lng) else {
        return Err(SpotError::precondition("coordinates are required"));
    };
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(SpotError::precondition(format!("latitude {lat} is out of range")));
    }
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        return Err(SpotError::precondition(format!("longitude {lng} is out of range")));
    }
    let category = draft
        .category
        .ok_or_else(|| SpotError::precondition("category is required"))?;
    let icon = draft
        .icon
        .ok_or_else(|| SpotError::precondition("icon is required"))?;
    let tags = normalize_tags(&draft.tags);
    if let Some(bad) = tags.iter().find(|t| t.contains('/')) {
        return Err(SpotError::precondition(format!("tag '{bad}' may not contain '/'")));
    }
    Ok(ValidDraft {
        place_id,
        name,
        lat,
        lng,
        category,
        icon,
        tags,
        notes: draft.notes,
        images: draft.images,
    })
}

fn decode_spot(id: &str, data: serde_json::Value, path: &str) -> SpotResult<Spot> {
    let id = SpotId::new(id).map_err(|e| SpotError::corrupt(path, e))?;
    Spot::from_value(id, data).map_err(|e| SpotError::corrupt(path, e))
}

fn encode_spot(spot: &Spot) -> SpotResult<serde_json::Value> {
    spot.to_value()
        .map_err(|e| SpotError::corrupt(spot.id.as_str(), e))
}
