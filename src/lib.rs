//! Password protection for individual notes.
//!
//! A locked note keeps its content in an encrypted payload envelope and each
//! attachment in its own encrypted file. [`lock::NoteLockSession`] unlocks a
//! note for one view and cleans up every plaintext copy when the view goes
//! away; [`lock::NoteLockService`] ties sessions to the note store for
//! saving and deleting.

pub mod config;
pub mod encryption;
pub mod lock;
pub mod storage;

pub use config::{ConfigError, LockConfig};
pub use encryption::{LockError, LockResult, SecureNotePayload};
pub use lock::{LockState, NoteLockService, NoteLockSession, UnlockedNote};
pub use storage::{Attachment, AttachmentKind, NoteRecord};
