//! Encryption data models

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::storage::{ChecklistItem, InlineAttachment, LinkItem};

/// Format version of an [`EncryptedEnvelope`] holding a note payload
pub const PAYLOAD_VERSION: u32 = 1;

/// Format version of a single encrypted attachment file
pub const ATTACHMENT_VERSION: u32 = 1;

/// Salt size in bytes
pub const SALT_SIZE: usize = 16;

/// Nonce size in bytes for ChaCha20-Poly1305
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Derived key size in bytes
pub const KEY_SIZE: usize = 32;

/// scrypt cost parameters.
///
/// Every stored envelope was derived with these values. Changing them makes
/// existing locked notes unreadable.
pub const SCRYPT_LOG_N: u8 = 9;
pub const SCRYPT_R: u32 = 8;
pub const SCRYPT_P: u32 = 1;

/// Plaintext bundle that gets sealed into a note's envelope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureNotePayload {
    pub content: String,
    #[serde(default)]
    pub plain_text: String,
    #[serde(default)]
    pub checklist: Vec<ChecklistItem>,
    #[serde(default)]
    pub links: Vec<LinkItem>,
}

/// What actually sits inside the ciphertext. Older app versions embedded the
/// attachments inline as base64; new envelopes never write that field.
#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct StoredPayload {
    #[serde(flatten)]
    pub note: SecureNotePayload,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<InlineAttachment>,
}

/// Output of one encryption: salt, nonce and ciphertext, all hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    #[serde(default = "default_payload_version")]
    pub version: u32,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

fn default_payload_version() -> u32 {
    PAYLOAD_VERSION
}

/// Encryption key with secure memory handling
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    /// The 256-bit key
    key: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Create a new encryption key from raw bytes
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Plaintext password kept for the lifetime of an unlocked note view
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionPassword(String);

impl SessionPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionPassword([REDACTED])")
    }
}
