//! Error types for mergeit.

use thiserror::Error;

/// Failure of a collaborator call (repository server, issue tracker, CI, ...).
///
/// Every remote call in the pipeline returns this type; the pipeline folds any
/// of these into a terminal failure for the branch being processed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("remote call failed: {0}")]
    Remote(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn remote(message: impl Into<String>) -> Self {
        Error::Remote(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
