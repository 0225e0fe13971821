use std::fmt;

use spotbook_store::StoreError;
use spotbook_types::{PlaceId, SpotId};

/// Coarse classification of a [`SpotError`], stable for callers that map
/// failures to user messages or exit codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Precondition,
    Conflict,
    Storage,
    Commit,
    Lookup,
    Corrupt,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Precondition => "precondition",
            Self::Conflict => "conflict",
            Self::Storage => "storage",
            Self::Commit => "commit",
            Self::Lookup => "lookup",
            Self::Corrupt => "corrupt",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by coordinator operations.
///
/// Every operation fails as a whole; no partial success is reported.
#[derive(Debug, thiserror::Error)]
pub enum SpotError {
    /// No authenticated owner, a missing or malformed field, or a target
    /// spot that does not exist. Raised before any external mutation.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Another spot of the same owner already uses this place id.
    #[error("place already saved: {place_id} (spot {existing})")]
    Conflict { place_id: PlaceId, existing: SpotId },

    /// A blob upload or delete failed for a reason other than not-found.
    /// Blob mutations already completed are not rolled back.
    #[error("blob storage failed at {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: StoreError,
    },

    /// The final atomic batch (or the checkpoint write) failed. Nothing in
    /// that batch was applied; the caller may retry the whole operation.
    #[error("commit failed: {0}")]
    Commit(#[source] StoreError),

    /// A document read or query failed before any mutation was issued.
    #[error("document lookup failed: {0}")]
    Lookup(#[source] StoreError),

    /// A persisted document could not be decoded.
    #[error("corrupt document {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SpotError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    pub fn storage(path: impl Into<String>, source: StoreError) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Precondition(_) => ErrorKind::Precondition,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Commit(_) => ErrorKind::Commit,
            Self::Lookup(_) => ErrorKind::Lookup,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

/// Result alias for coordinator operations.
pub type SpotResult<T> = Result<T, SpotError>;
