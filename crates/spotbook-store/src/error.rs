/// Errors from document and blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The addressed document or blob does not exist.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// The backend could not be reached or refused to serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the request as malformed.
    #[error("rejected write to {path}: {reason}")]
    Rejected { path: String, reason: String },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn rejected(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error means the target does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
