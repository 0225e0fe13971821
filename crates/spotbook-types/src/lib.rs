//! Foundation types for Spotbook.
//!
//! This crate provides the identity and record types shared by the storage
//! backends and the upsert coordinator. Every other Spotbook crate depends on
//! `spotbook-types`.
//!
//! # Key Types
//!
//! - [`OwnerId`], [`SpotId`], [`PlaceId`] -- string identifiers for owners, spots, and places
//! - [`Session`] -- explicit owner context passed into every coordinator call
//! - [`Spot`] -- a saved place with metadata, tags, and ordered images
//! - [`Image`] / [`ImageId`] -- a stored photo and the numeric token in its path
//! - [`Checkpoint`] -- intent record written before blob mutations
//! - [`TagIndexRow`] -- one row of the per-owner inverted tag index

pub mod checkpoint;
pub mod error;
pub mod identity;
pub mod image;
pub mod spot;
pub mod tag;

pub use checkpoint::Checkpoint;
pub use error::TypeError;
pub use identity::{OwnerId, PlaceId, Session, SpotId};
pub use image::{Image, ImageId};
pub use spot::{Category, Icon, Spot};
pub use tag::{normalize_tags, TagIndexRow};
