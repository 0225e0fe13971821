//! Image reconciliation: move a spot from its existing image set to the
//! caller's desired one with the fewest blob mutations.
//!
//! Planning is pure and happens before anything is written. Execution issues
//! every upload and delete at once and waits for all of them, so a failed
//! step still leaves no request in flight.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use rand::Rng;
use spotbook_store::{BlobStore, StoreResult};
use spotbook_types::{Image, ImageId, OwnerId, PlaceId};
use tracing::debug;

use crate::config::CoordinatorConfig;
use crate::error::{SpotError, SpotResult};
use crate::layout;

/// One entry of the desired, ordered image list.
#[derive(Clone, Debug, PartialEq)]
pub enum ImageSource {
    /// Keep an image already attached to the spot, addressed by storage path.
    Keep { storage_path: String },
    /// Upload a new raw blob.
    Upload { bytes: Bytes },
}

impl ImageSource {
    pub fn keep(storage_path: impl Into<String>) -> Self {
        Self::Keep {
            storage_path: storage_path.into(),
        }
    }

    pub fn upload(bytes: impl Into<Bytes>) -> Self {
        Self::Upload {
            bytes: bytes.into(),
        }
    }
}

/// Allocates image ids that collide neither with surviving images nor with
/// ids handed out earlier in the same reconciliation.
#[derive(Clone, Debug)]
pub struct ImageIdAllocator {
    range: u32,
    used: HashSet<u32>,
}

impl ImageIdAllocator {
    /// Seed the allocator with every id in `0..range` already used by
    /// `existing`. Ids outside the range never collide with a draw.
    pub fn new(range: u32, existing: &[Image]) -> Self {
        Self {
            range,
            used: existing
                .iter()
                .filter_map(Image::image_id)
                .map(ImageId::value)
                .filter(|id| *id < range)
                .collect(),
        }
    }

    /// Draw random ids until one is unused.
    pub fn allocate<R: Rng>(&mut self, rng: &mut R) -> SpotResult<ImageId> {
        if self.used.len() >= self.range as usize {
            return Err(SpotError::precondition("image id space exhausted"));
        }
        loop {
            let candidate = rng.gen_range(0..self.range);
            if self.used.insert(candidate) {
                return Ok(ImageId::new(candidate));
            }
        }
    }
}

/// A new blob to upload, with its allocated id and path.
#[derive(Clone, Debug)]
pub struct PlannedUpload {
    pub image_id: ImageId,
    pub storage_path: String,
    bytes: Bytes,
}

impl PlannedUpload {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Clone, Debug)]
enum Slot {
    Keep(Image),
    Upload(usize),
}

/// The minimal set of blob mutations plus the final image order.
#[derive(Clone, Debug)]
pub struct ReconcilePlan {
    pub to_delete: Vec<String>,
    pub to_upload: Vec<PlannedUpload>,
    slots: Vec<Slot>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.to_delete.is_empty() && self.to_upload.is_empty()
    }
}

/// Result of executing a plan.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileOutcome {
    /// Final image list, in the caller's order.
    pub images: Vec<Image>,
    pub uploaded: Vec<String>,
    pub deleted: Vec<String>,
}

/// Delete a blob, treating "already gone" as success.
///
/// Returns `true` if a blob was removed, `false` if none was there.
pub async fn delete_idempotent(blobs: &dyn BlobStore, path: &str) -> StoreResult<bool> {
    match blobs.delete(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => {
            debug!(path, "blob already absent");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Diffs image sets and applies the difference to the blob store.
#[derive(Clone)]
pub struct ImageReconciler {
    blobs: Arc<dyn BlobStore>,
    config: Arc<CoordinatorConfig>,
}

impl ImageReconciler {
    pub fn new(blobs: Arc<dyn BlobStore>, config: Arc<CoordinatorConfig>) -> Self {
        Self { blobs, config }
    }

    /// Compute uploads, deletions, and final order without touching storage.
    ///
    /// New uploads are placed under `place`. Every `Keep` must name an image
    /// in `existing`, at most once.
    pub fn plan<R: Rng>(
        &self,
        owner: &OwnerId,
        place: &PlaceId,
        existing: &[Image],
        desired: Vec<ImageSource>,
        rng: &mut R,
    ) -> SpotResult<ReconcilePlan> {
        let mut ids = ImageIdAllocator::new(self.config.image_id_range, existing);
        let mut kept: HashSet<String> = HashSet::new();
        let mut slots = Vec::with_capacity(desired.len());
        let mut to_upload = Vec::new();

        for source in desired {
            match source {
                ImageSource::Keep { storage_path } => {
                    let image = existing
                        .iter()
                        .find(|i| i.storage_path == storage_path)
                        .ok_or_else(|| {
                            SpotError::precondition(format!(
                                "image {storage_path} is not attached to this spot"
                            ))
                        })?;
                    if !kept.insert(storage_path.clone()) {
                        return Err(SpotError::precondition(format!(
                            "image {storage_path} is listed twice"
                        )));
                    }
                    slots.push(Slot::Keep(image.clone()));
                }
                ImageSource::Upload { bytes } => {
                    self.check_upload(&bytes)?;
                    let image_id = ids.allocate(rng)?;
                    let storage_path = layout::image_path(
                        owner,
                        place,
                        image_id,
                        &self.config.image_extension,
                    );
                    slots.push(Slot::Upload(to_upload.len()));
                    to_upload.push(PlannedUpload {
                        image_id,
                        storage_path,
                        bytes,
                    });
                }
            }
        }

        let to_delete = existing
            .iter()
            .filter(|i| !kept.contains(&i.storage_path))
            .map(|i| i.storage_path.clone())
            .collect();

        Ok(ReconcilePlan {
            to_delete,
            to_upload,
            slots,
        })
    }

    fn check_upload(&self, bytes: &Bytes) -> SpotResult<()> {
        if bytes.is_empty() {
            return Err(SpotError::precondition("image upload is empty"));
        }
        if bytes.len() > self.config.max_image_bytes {
            return Err(SpotError::precondition(format!(
                "image upload is {} bytes, limit is {}",
                bytes.len(),
                self.config.max_image_bytes
            )));
        }
        Ok(())
    }

    /// Issue every upload and delete concurrently and wait for all of them.
    ///
    /// The first failure, in plan order, fails the step. Completed mutations
    /// are not rolled back.
    pub async fn execute(&self, plan: ReconcilePlan) -> SpotResult<ReconcileOutcome> {
        let content_type = self.config.image_content_type.as_str();
        let uploads = plan.to_upload.iter().map(|u| async move {
            self.blobs
                .put(&u.storage_path, u.bytes.clone(), content_type)
                .await
                .map_err(|e| SpotError::storage(&u.storage_path, e))
        });
        let deletes = plan.to_delete.iter().map(|path| async move {
            delete_idempotent(self.blobs.as_ref(), path)
                .await
                .map_err(|e| SpotError::storage(path, e))
        });
        let (uploaded, deleted) = futures::join!(join_all(uploads), join_all(deletes));

        let urls = uploaded.into_iter().collect::<SpotResult<Vec<String>>>()?;
        deleted.into_iter().collect::<SpotResult<Vec<bool>>>()?;
        debug!(
            uploads = urls.len(),
            deletes = plan.to_delete.len(),
            "image reconcile complete"
        );

        let images = plan
            .slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Keep(image) => image,
                Slot::Upload(i) => Image::new(plan.to_upload[i].storage_path.clone(), urls[i].clone()),
            })
            .collect();

        Ok(ReconcileOutcome {
            images,
            uploaded: plan.to_upload.into_iter().map(|u| u.storage_path).collect(),
            deleted: plan.to_delete,
        })
    }

    /// Delete every listed blob concurrently, ignoring ones already gone.
    pub async fn delete_all(&self, paths: &[String]) -> SpotResult<()> {
        let deletes = paths.iter().map(|path| async move {
            delete_idempotent(self.blobs.as_ref(), path)
                .await
                .map_err(|e| SpotError::storage(path, e))
        });
        join_all(deletes)
            .await
            .into_iter()
            .collect::<SpotResult<Vec<bool>>>()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use spotbook_store::InMemoryBlobStore;
    use std::time::Duration;

    fn owner() -> OwnerId {
        OwnerId::new("u1").unwrap()
    }

    fn place() -> PlaceId {
        PlaceId::new("p1").unwrap()
    }

    fn reconciler(blobs: Arc<InMemoryBlobStore>) -> ImageReconciler {
        ImageReconciler::new(blobs, Arc::new(CoordinatorConfig::default()))
    }

    fn seeded(blobs: &InMemoryBlobStore, ids: &[u32]) -> Vec<Image> {
        ids.iter()
            .map(|id| {
                let path = format!("users/u1/spots/p1/{id}.png");
                blobs.insert(path.clone(), Bytes::from_static(b"old"));
                Image::new(path.clone(), format!("memory://{path}"))
            })
            .collect()
    }

    #[test]
    fn allocator_skips_used_ids() {
        let existing = vec![Image::new("users/u1/spots/p1/3.png", "u")];
        let mut ids = ImageIdAllocator::new(4, &existing);
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = HashSet::new();
        for _ in 0..3 {
            let id = ids.allocate(&mut rng).unwrap();
            assert_ne!(id.value(), 3);
            assert!(seen.insert(id));
        }
        // 0..4 is now fully used.
        assert!(ids.allocate(&mut rng).is_err());
    }

    #[test]
    fn allocator_ignores_out_of_range_ids() {
        let existing: Vec<Image> = [0, 1, 2, 3, 99]
            .iter()
            .map(|id| Image::new(format!("users/u1/spots/p1/{id}.png"), "u"))
            .collect();
        let mut ids = ImageIdAllocator::new(5, &existing);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(ids.allocate(&mut rng).unwrap(), ImageId::new(4));
        assert!(ids.allocate(&mut rng).is_err());
    }

    #[test]
    fn plan_replaces_one_image() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let existing = seeded(&blobs, &[10, 20]);
        let plan = reconciler(blobs)
            .plan(
                &owner(),
                &place(),
                &existing,
                vec![
                    ImageSource::keep(&existing[0].storage_path),
                    ImageSource::upload(&b"new"[..]),
                ],
                &mut StdRng::seed_from_u64(1),
            )
            .unwrap();
        assert_eq!(plan.to_delete, vec![existing[1].storage_path.clone()]);
        assert_eq!(plan.to_upload.len(), 1);
        assert_ne!(plan.to_upload[0].image_id, ImageId::new(10));
        assert!(!plan.is_noop());
    }

    #[test]
    fn plan_rejects_foreign_and_duplicate_keeps() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let existing = seeded(&blobs, &[10]);
        let r = reconciler(blobs);
        let foreign = r.plan(
            &owner(),
            &place(),
            &existing,
            vec![ImageSource::keep("users/u2/spots/p1/10.png")],
            &mut StdRng::seed_from_u64(1),
        );
        assert!(matches!(foreign, Err(SpotError::Precondition(_))));

        let twice = r.plan(
            &owner(),
            &place(),
            &existing,
            vec![
                ImageSource::keep(&existing[0].storage_path),
                ImageSource::keep(&existing[0].storage_path),
            ],
            &mut StdRng::seed_from_u64(1),
        );
        assert!(matches!(twice, Err(SpotError::Precondition(_))));
    }

    #[test]
    fn plan_rejects_empty_and_oversized_uploads() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let r = ImageReconciler::new(
            blobs,
            Arc::new(CoordinatorConfig {
                max_image_bytes: 4,
                ..CoordinatorConfig::default()
            }),
        );
        let mut rng = StdRng::seed_from_u64(1);
        assert!(r
            .plan(&owner(), &place(), &[], vec![ImageSource::upload(Bytes::new())], &mut rng)
            .is_err());
        assert!(r
            .plan(&owner(), &place(), &[], vec![ImageSource::upload(&b"12345"[..])], &mut rng)
            .is_err());
    }

    #[test]
    fn colliding_draws_are_regenerated() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let existing = seeded(&blobs, &[0]);
        let r = ImageReconciler::new(
            blobs,
            Arc::new(CoordinatorConfig {
                image_id_range: 3,
                ..CoordinatorConfig::default()
            }),
        );
        // Only 1 and 2 are free, so draws of 0 and repeats must be retried.
        for seed in 0..20 {
            let plan = r
                .plan(
                    &owner(),
                    &place(),
                    &existing,
                    vec![ImageSource::upload(&b"a"[..]), ImageSource::upload(&b"b"[..])],
                    &mut StdRng::seed_from_u64(seed),
                )
                .unwrap();
            let ids: HashSet<ImageId> = plan.to_upload.iter().map(|u| u.image_id).collect();
            assert_eq!(ids, [ImageId::new(1), ImageId::new(2)].into_iter().collect());
        }
    }

    #[tokio::test]
    async fn execute_preserves_order_and_keeps_paths() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let existing = seeded(&blobs, &[10, 20]);
        let r = reconciler(blobs.clone());
        let plan = r
            .plan(
                &owner(),
                &place(),
                &existing,
                vec![
                    ImageSource::upload(&b"new"[..]),
                    ImageSource::keep(&existing[1].storage_path),
                ],
                &mut StdRng::seed_from_u64(3),
            )
            .unwrap();
        let outcome = r.execute(plan).await.unwrap();

        assert_eq!(outcome.images.len(), 2);
        assert_eq!(outcome.images[1], existing[1]);
        assert_eq!(outcome.images[0].storage_path, outcome.uploaded[0]);
        assert_eq!(outcome.deleted, vec![existing[0].storage_path.clone()]);
        assert!(!blobs.contains(&existing[0].storage_path));
        assert!(blobs.contains(&outcome.uploaded[0]));
        assert_eq!(blobs.put_count(), 1);
    }

    #[tokio::test]
    async fn delete_of_missing_blob_is_success() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let existing = vec![Image::new("users/u1/spots/p1/5.png", "u")];
        let r = reconciler(blobs.clone());
        let plan = r
            .plan(&owner(), &place(), &existing, vec![], &mut StdRng::seed_from_u64(3))
            .unwrap();
        let outcome = r.execute(plan).await.unwrap();
        assert!(outcome.images.is_empty());
        assert!(!delete_idempotent(blobs.as_ref(), "users/u1/spots/p1/5.png").await.unwrap());
    }

    #[tokio::test]
    async fn upload_failure_fails_the_step() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let existing = seeded(&blobs, &[10]);
        blobs.fail_puts(true);
        let r = reconciler(blobs.clone());
        let plan = r
            .plan(
                &owner(),
                &place(),
                &existing,
                vec![ImageSource::upload(&b"x"[..])],
                &mut StdRng::seed_from_u64(3),
            )
            .unwrap();
        let err = r.execute(plan).await.unwrap_err();
        assert!(matches!(err, SpotError::Storage { .. }));
        // The delete ran to completion alongside the failed upload.
        assert!(!blobs.contains(&existing[0].storage_path));
    }

    #[tokio::test]
    async fn mutations_run_concurrently() {
        let blobs = Arc::new(InMemoryBlobStore::with_latency(Duration::from_millis(5)));
        let existing = seeded(&blobs, &[1, 2]);
        let r = reconciler(blobs.clone());
        let plan = r
            .plan(
                &owner(),
                &place(),
                &existing,
                vec![ImageSource::upload(&b"a"[..]), ImageSource::upload(&b"b"[..])],
                &mut StdRng::seed_from_u64(3),
            )
            .unwrap();
        r.execute(plan).await.unwrap();
        assert_eq!(blobs.max_in_flight(), 4);
    }

    proptest! {
        #[test]
        fn new_ids_are_distinct_from_each_other_and_kept_images(
            kept in proptest::collection::hash_set(0u32..50, 0..10),
            uploads in 0usize..10,
            seed in any::<u64>(),
        ) {
            let blobs = Arc::new(InMemoryBlobStore::new());
            let existing: Vec<Image> = kept
                .iter()
                .map(|id| Image::new(format!("users/u1/spots/p1/{id}.png"), "u"))
                .collect();
            let r = ImageReconciler::new(
                blobs,
                Arc::new(CoordinatorConfig { image_id_range: 50, ..CoordinatorConfig::default() }),
            );
            let mut desired: Vec<ImageSource> =
                existing.iter().map(|i| ImageSource::keep(&i.storage_path)).collect();
            desired.extend((0..uploads).map(|_| ImageSource::upload(&b"x"[..])));
            let plan = r
                .plan(&owner(), &place(), &existing, desired, &mut StdRng::seed_from_u64(seed))
                .unwrap();
            let new_ids: HashSet<u32> = plan.to_upload.iter().map(|u| u.image_id.value()).collect();
            prop_assert_eq!(new_ids.len(), uploads);
            prop_assert!(new_ids.is_disjoint(&kept));
            prop_assert!(plan.to_delete.is_empty());
        }
    }
}
