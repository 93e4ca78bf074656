//! Pending store errors

use std::io;

use thiserror::Error;

/// Result type for pending store operations
pub type PendingResult<T> = Result<T, PendingError>;

/// Pending store errors
#[derive(Debug, Error)]
pub enum PendingError {
    /// Writing the temporary file failed
    #[error("Failed to stage pending record {id}: {source}")]
    StageFailed {
        id: String,
        #[source]
        source: io::Error,
    },

    /// Renaming the temporary file into place failed
    #[error("Failed to publish pending record {id}: {source}")]
    RenameFailed {
        id: String,
        #[source]
        source: io::Error,
    },

    /// Reading a staged record failed
    #[error("Failed to read pending record {id}: {source}")]
    ReadFailed {
        id: String,
        #[source]
        source: io::Error,
    },

    /// Deleting a merged record failed
    #[error("Failed to remove pending record {id}: {source}")]
    RemoveFailed {
        id: String,
        #[source]
        source: io::Error,
    },

    /// Listing or preparing the store directory failed
    #[error("Pending store directory error: {0}")]
    Directory(#[source] io::Error),

    /// Id is not a valid pending record name
    #[error("Invalid pending record id: {0:?}")]
    InvalidId(String),
}
