//! Storage contracts for Spotbook.
//!
//! The upsert coordinator talks to two independently failing external
//! stores with no shared transaction:
//!
//! - a [`DocumentStore`] holding spot records, tag index rows, and
//!   checkpoints, which can apply a [`WriteBatch`] atomically;
//! - a [`BlobStore`] holding uploaded photos by path.
//!
//! # Backends
//!
//! - [`InMemoryDocumentStore`] / [`InMemoryBlobStore`] -- for tests and
//!   embedding, with fault injection and mutation counters
//! - [`FsDocumentStore`] / [`FsBlobStore`] -- a JSON document file and a
//!   blob directory tree, used by the command-line tool
//!
//! # Design Rules
//!
//! 1. A batch applies completely or not at all.
//! 2. Blob deletes report a missing target as [`StoreError::NotFound`] so
//!    callers can tell "already gone" from a transport failure.
//! 3. All I/O errors are propagated, never silently ignored.

pub mod document;
pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

pub use document::{Collections, DocRef, Document, QueryOp, Write, WriteBatch};
pub use error::{StoreError, StoreResult};
pub use fs::{FsBlobStore, FsDocumentStore};
pub use memory::{InMemoryBlobStore, InMemoryDocumentStore};
pub use traits::{BlobStore, DocumentStore};
