//! Lock and unlock error types

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur while locking or unlocking a note
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock field or one of its parts has the wrong shape.
    /// This is a parse failure, not a crypto failure.
    #[error("Invalid lock envelope: {0}")]
    InvalidEnvelope(String),

    /// AEAD tag mismatch. A wrong password and corrupted ciphertext look
    /// the same here.
    #[error("Wrong password or corrupted data")]
    AuthenticationFailure,

    #[error("Attachment IO failed for {path:?}: {source}")]
    AttachmentIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One attachment of a batch failed after `index` others succeeded.
    /// The side effects of the batch have been rolled back.
    #[error("Attachment {} of {total} failed: {source}", .index + 1)]
    PartialBatchFailure {
        index: usize,
        total: usize,
        #[source]
        source: Box<LockError>,
    },

    #[error("Another lock operation is already running for this note")]
    OperationInProgress,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Password is required")]
    PasswordRequired,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Key derivation or cipher work on the blocking pool panicked or was
    /// cancelled by runtime shutdown
    #[error("Background task failed: {0}")]
    BackgroundTask(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl LockError {
    /// True when the UI should show a generic retry prompt
    pub fn is_wrong_password(&self) -> bool {
        match self {
            LockError::AuthenticationFailure => true,
            LockError::PartialBatchFailure { source, .. } => source.is_wrong_password(),
            _ => false,
        }
    }

    /// True when the note cannot be unlocked with any password
    pub fn is_unrecoverable(&self) -> bool {
        match self {
            LockError::InvalidEnvelope(_) => true,
            LockError::PartialBatchFailure { source, .. } => source.is_unrecoverable(),
            _ => false,
        }
    }

    pub(crate) fn attachment_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LockError::AttachmentIo {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for lock operations
pub type LockResult<T> = Result<T, LockError>;
