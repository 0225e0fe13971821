//! Consistency checks and repairs across the document and blob stores.
//!
//! The coordinator tolerates a few kinds of drift: checkpoints left by
//! interrupted upserts, blobs uploaded or orphaned by a failed commit, and
//! spots written before images carried a `storagePath`. [`Auditor`] finds
//! them; only [`Auditor::reindex`] and [`Auditor::migrate_legacy_images`]
//! write anything.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use spotbook_store::{BlobStore, Document, DocumentStore, WriteBatch};
use spotbook_types::{Image, OwnerId, SpotId};
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointLog, PendingCheckpoint};
use crate::config::CoordinatorConfig;
use crate::error::{SpotError, SpotResult};
use crate::layout;
use crate::tag_index::{self, IndexMismatch, TagIndex};

/// Findings of one audit pass over an owner's data.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub owner: OwnerId,
    pub spots: usize,
    pub orphaned_checkpoints: Vec<PendingCheckpoint>,
    pub index_mismatches: Vec<IndexMismatch>,
    /// Spots still holding bare download URLs in `images`.
    pub legacy_spots: Vec<SpotId>,
    /// Spot documents that decode neither as current nor as legacy spots.
    pub unreadable_spots: Vec<SpotId>,
    /// Blobs under the owner's prefix that no spot references.
    pub orphaned_blobs: Vec<String>,
    /// Storage paths referenced by a spot with no blob behind them.
    pub missing_blobs: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_checkpoints.is_empty()
            && self.index_mismatches.is_empty()
            && self.legacy_spots.is_empty()
            && self.unreadable_spots.is_empty()
            && self.orphaned_blobs.is_empty()
            && self.missing_blobs.is_empty()
    }
}

/// A legacy image URL that could not be converted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedImage {
    pub spot_id: SpotId,
    pub url: String,
}

/// Result of migrating legacy images.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: Vec<SpotId>,
    /// Spots left untouched because at least one URL did not convert.
    pub skipped: Vec<SkippedImage>,
}

/// Just enough of a spot document to audit it, whatever its vintage.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LooseSpot {
    tags: BTreeSet<String>,
    images: Vec<LooseImage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LooseImage {
    Current(Image),
    Legacy(String),
}

struct ScannedSpot {
    id: SpotId,
    data: Value,
    loose: Option<LooseSpot>,
}

impl ScannedSpot {
    fn is_legacy(&self) -> bool {
        self.loose.as_ref().is_some_and(|l| {
            l.images
                .iter()
                .any(|i| matches!(i, LooseImage::Legacy(_)))
        })
    }
}

/// Recover a storage path from a legacy download URL.
///
/// Returns `None` unless the URL carries the configured prefix and query
/// marker and decodes to an image path under the owner's blob prefix.
pub fn storage_path_from_legacy_url(
    url: &str,
    owner: &OwnerId,
    config: &CoordinatorConfig,
) -> Option<String> {
    let encoded = url.strip_prefix(config.legacy_url_prefix.as_str())?;
    let (encoded, _token) = encoded.split_once(config.legacy_url_query_marker.as_str())?;
    let path = encoded.replace("%2F", "/").replace("%2f", "/");
    let extension = format!(".{}", config.image_extension);
    let safe = path.starts_with(&layout::blob_prefix(owner))
        && path.ends_with(&extension)
        && !path.contains('%')
        && path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..");
    safe.then_some(path)
}

/// Read-mostly consistency checker for one store pair.
#[derive(Clone)]
pub struct Auditor {
    docs: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    config: Arc<CoordinatorConfig>,
    checkpoints: CheckpointLog,
    tags: TagIndex,
}

impl Auditor {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            checkpoints: CheckpointLog::new(docs.clone()),
            tags: TagIndex::new(docs.clone()),
            config: Arc::new(config),
            docs,
            blobs,
        }
    }

    async fn scan(&self, owner: &OwnerId) -> SpotResult<Vec<ScannedSpot>> {
        let docs = self
            .docs
            .list(&layout::spots_collection(owner))
            .await
            .map_err(SpotError::Lookup)?;
        docs.into_iter()
            .map(|Document { reference, data }| -> SpotResult<ScannedSpot> {
                let id = SpotId::new(reference.id.as_str())
                    .map_err(|e| SpotError::corrupt(reference.path(), e))?;
                let loose = serde_json::from_value::<LooseSpot>(data.clone()).ok();
                Ok(ScannedSpot { id, data, loose })
            })
            .collect()
    }

    /// Check one owner's spots, tag index, checkpoints and blobs.
    pub async fn audit(&self, owner: &OwnerId) -> SpotResult<AuditReport> {
        let scanned = self.scan(owner).await?;
        let mut report = AuditReport {
            owner: owner.clone(),
            spots: scanned.len(),
            ..AuditReport::default()
        };

        let mut referenced = BTreeSet::new();
        for spot in &scanned {
            let Some(loose) = &spot.loose else {
                report.unreadable_spots.push(spot.id.clone());
                continue;
            };
            if spot.is_legacy() {
                report.legacy_spots.push(spot.id.clone());
            }
            for image in &loose.images {
                let path = match image {
                    LooseImage::Current(image) => Some(image.storage_path.clone()),
                    LooseImage::Legacy(url) => {
                        storage_path_from_legacy_url(url, owner, &self.config)
                    }
                };
                referenced.extend(path);
            }
        }

        let derived = derive_index(&scanned);
        let stored = self.tags.rows(owner).await?;
        report.index_mismatches = tag_index::compare(&derived, &stored);

        report.orphaned_checkpoints = self.checkpoints.list(owner).await?;

        let present: BTreeSet<String> = self
            .blobs
            .list(&layout::blob_prefix(owner))
            .await
            .map_err(SpotError::Lookup)?
            .into_iter()
            .collect();
        report.orphaned_blobs = present.difference(&referenced).cloned().collect();
        report.missing_blobs = referenced.difference(&present).cloned().collect();

        if report.is_clean() {
            debug!(%owner, spots = report.spots, "audit clean");
        } else {
            warn!(
                %owner,
                checkpoints = report.orphaned_checkpoints.len(),
                mismatches = report.index_mismatches.len(),
                legacy = report.legacy_spots.len(),
                orphaned_blobs = report.orphaned_blobs.len(),
                missing_blobs = report.missing_blobs.len(),
                "audit found drift"
            );
        }
        Ok(report)
    }

    /// Overwrite the owner's tag index with one derived from a scan.
    ///
    /// Returns the rows that disagreed before the rewrite. Nothing is written
    /// when the index already matches.
    pub async fn reindex(&self, owner: &OwnerId) -> SpotResult<Vec<IndexMismatch>> {
        let scanned = self.scan(owner).await?;
        let derived = derive_index(&scanned);
        let stored = self.tags.rows(owner).await?;
        let mismatches = tag_index::compare(&derived, &stored);
        if mismatches.is_empty() {
            debug!(%owner, "tag index already consistent");
            return Ok(mismatches);
        }
        let batch = tag_index::reindex_batch(owner, &derived, &stored);
        self.docs.apply_batch(batch).await.map_err(SpotError::Commit)?;
        info!(%owner, repaired = mismatches.len(), "tag index rebuilt");
        Ok(mismatches)
    }

    /// Convert bare-URL images into `{url, storagePath}` objects.
    ///
    /// A spot is rewritten only if every one of its legacy URLs converts.
    /// All rewrites land in one batch.
    pub async fn migrate_legacy_images(&self, owner: &OwnerId) -> SpotResult<MigrationReport> {
        let scanned = self.scan(owner).await?;
        let mut report = MigrationReport::default();
        let mut batch = WriteBatch::new();

        for spot in scanned.into_iter().filter(ScannedSpot::is_legacy) {
            let Some(images) = spot.data.get("images").and_then(Value::as_array) else {
                continue;
            };
            let mut converted = Vec::with_capacity(images.len());
            let mut failed = Vec::new();
            for entry in images {
                match entry {
                    Value::String(url) => {
                        match storage_path_from_legacy_url(url, owner, &self.config) {
                            Some(path) => converted.push(
                                serde_json::to_value(Image::new(path, url.as_str()))
                                    .map_err(|e| SpotError::corrupt(spot.id.as_str(), e))?,
                            ),
                            None => failed.push(url.clone()),
                        }
                    }
                    other => converted.push(other.clone()),
                }
            }
            if !failed.is_empty() {
                warn!(%owner, spot_id = %spot.id, unconvertible = failed.len(), "legacy images left in place");
                report.skipped.extend(failed.into_iter().map(|url| SkippedImage {
                    spot_id: spot.id.clone(),
                    url,
                }));
                continue;
            }
            let mut data = spot.data;
            if let Some(fields) = data.as_object_mut() {
                fields.insert("images".into(), Value::Array(converted));
            }
            batch.set(layout::spot_doc(owner, &spot.id), data);
            report.migrated.push(spot.id);
        }

        if !batch.is_empty() {
            self.docs.apply_batch(batch).await.map_err(SpotError::Commit)?;
            info!(%owner, migrated = report.migrated.len(), "legacy images migrated");
        }
        Ok(report)
    }
}

fn derive_index(scanned: &[ScannedSpot]) -> BTreeMap<String, BTreeSet<SpotId>> {
    tag_index::rebuild(
        scanned
            .iter()
            .filter_map(|s| s.loose.as_ref().map(|l| (&s.id, &l.tags))),
    )
}
