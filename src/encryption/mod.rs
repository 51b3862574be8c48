//! Encryption module for per-note password protection
//!
//! This module provides:
//! - scrypt password-based key derivation
//! - ChaCha20-Poly1305 authenticated encryption
//! - The hex encoded envelope a note payload is sealed into

pub mod crypto;
pub mod envelope;
pub mod errors;
pub mod models;

// Re-export commonly used types
pub use crypto::{decrypt, derive_key, encrypt, generate_nonce, generate_salt};
pub use envelope::{lock_payload, unlock_payload, unlock_payload_with_inline};
pub use errors::{LockError, LockResult};
pub use models::{
    EncryptedEnvelope, EncryptionKey, SecureNotePayload, SessionPassword, ATTACHMENT_VERSION,
    PAYLOAD_VERSION,
};
