use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("unknown icon: {0}")]
    UnknownIcon(String),

    #[error("{0} must not be empty")]
    EmptyIdentifier(&'static str),

    #[error("invalid image storage path: {0}")]
    InvalidImagePath(String),
}
