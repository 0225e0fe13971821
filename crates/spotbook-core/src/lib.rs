//! Spot upsert/delete coordination for Spotbook.
//!
//! A spot lives in two places at once: its record (plus tag index rows) in
//! a [`DocumentStore`](spotbook_store::DocumentStore), and its photos in a
//! [`BlobStore`](spotbook_store::BlobStore). The two stores share no
//! transaction, so [`SpotCoordinator`] runs every change as a small saga:
//!
//! 1. validate the session, the draft, and place id uniqueness;
//! 2. record a [`Checkpoint`](spotbook_types::Checkpoint) of intent;
//! 3. upload and delete blobs, all in parallel;
//! 4. commit the spot, the tag index delta, and the checkpoint removal in
//!    one atomic batch.
//!
//! # Components
//!
//! - [`IdentityResolver`] -- one spot per owner and place id
//! - [`ImageReconciler`] -- minimal blob mutations between image sets
//! - [`TagIndex`] and [`diff_tags`] -- the per-owner inverted tag index
//! - [`CheckpointLog`] -- intent records and orphan inspection
//! - [`Auditor`] -- drift detection, reindexing, and legacy image migration
//!
//! # Design Rules
//!
//! 1. No document other than the checkpoint is written before the final
//!    batch.
//! 2. A failed step fails the whole operation; completed blob mutations
//!    are not rolled back.
//! 3. Orphaned checkpoints and blobs are reported, never removed
//!    implicitly.

pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod images;
pub mod layout;
pub mod tag_index;

pub use audit::{storage_path_from_legacy_url, AuditReport, Auditor, MigrationReport, SkippedImage};
pub use checkpoint::{CheckpointLog, PendingCheckpoint};
pub use config::CoordinatorConfig;
pub use coordinator::{DeleteReceipt, SpotCoordinator, SpotDraft, UpsertReceipt, UpsertState};
pub use error::{ErrorKind, SpotError, SpotResult};
pub use identity::IdentityResolver;
pub use images::{ImageReconciler, ImageSource, ReconcileOutcome, ReconcilePlan};
pub use tag_index::{diff_tags, IndexMismatch, TagDelta, TagIndex};
