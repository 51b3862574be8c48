//! Note locking: attachment encryption, the stored lock field and the
//! per-view unlock session.

mod attachments;
mod payload;
mod service;
mod session;
mod staging;

pub use attachments::{AttachmentLockManager, EncryptedAttachment};
pub use payload::{
    parse_lock_payload, parse_lock_payload_strict, LockEnvelope, LockedAttachmentDescriptor,
    NoteLockPayload, LEGACY_LOCK_VERSION, LOCK_PAYLOAD_VERSION,
};
pub use service::NoteLockService;
pub use session::{
    LockState, NoteLockSession, PendingSave, UnlockedNote, LOCKED_CONTENT_PLACEHOLDER,
    LOCKED_PREVIEW_PLACEHOLDER,
};
pub use staging::{sanitize_attachment_id, StagingArea};
