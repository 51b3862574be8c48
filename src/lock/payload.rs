//! The opaque lock field stored on a note record
//!
//! Two shapes exist in the wild. Current notes store a wrapper with the
//! payload envelope and one descriptor per encrypted attachment file.
//! Notes locked by older app versions store the bare envelope, with the
//! attachments embedded inside the encrypted payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::encryption::{EncryptedEnvelope, LockError, LockResult, ATTACHMENT_VERSION};
use crate::storage::AttachmentKind;

/// Version written into every new [`NoteLockPayload`]
pub const LOCK_PAYLOAD_VERSION: u32 = 2;

/// Version assigned to bare legacy envelopes that do not carry one
pub const LEGACY_LOCK_VERSION: u32 = 1;

/// Points at one encrypted attachment file. The salt and nonce belong to
/// this attachment only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedAttachmentDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Path of the encrypted blob, relative to the storage root
    pub file: String,
    pub salt: String,
    pub nonce: String,
    #[serde(default = "default_attachment_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

fn default_attachment_version() -> u32 {
    ATTACHMENT_VERSION
}

/// Everything persisted in a locked note's lock field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteLockPayload {
    pub version: u32,
    pub payload: EncryptedEnvelope,
    pub attachments: Vec<LockedAttachmentDescriptor>,
}

impl NoteLockPayload {
    pub fn new(payload: EncryptedEnvelope, attachments: Vec<LockedAttachmentDescriptor>) -> Self {
        Self {
            version: LOCK_PAYLOAD_VERSION,
            payload,
            attachments,
        }
    }

    /// Serialize for the note's lock field
    pub fn to_json(&self) -> LockResult<String> {
        serde_json::to_string(self).map_err(|e| LockError::EncryptionFailed(e.to_string()))
    }

    /// Legacy payloads keep their attachments inside the ciphertext
    pub fn is_legacy(&self) -> bool {
        self.version < LOCK_PAYLOAD_VERSION
    }
}

/// The two stored shapes, decoded once at the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEnvelope {
    Current(NoteLockPayload),
    Legacy(EncryptedEnvelope),
}

impl LockEnvelope {
    /// Decode a raw lock field. The shape is decided by which keys exist:
    /// `payload` + `attachments` is current, a bare `ciphertext` is legacy.
    pub fn decode(raw: &str) -> LockResult<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| LockError::InvalidEnvelope(format!("lock payload is not JSON: {}", e)))?;

        let object = value
            .as_object()
            .ok_or_else(|| LockError::InvalidEnvelope("lock payload is not an object".to_string()))?;

        if object.contains_key("payload") && object.contains_key("attachments") {
            let current: NoteLockPayload = serde_json::from_value(value)
                .map_err(|e| LockError::InvalidEnvelope(format!("current lock payload: {}", e)))?;
            return Ok(LockEnvelope::Current(current));
        }

        if object.contains_key("ciphertext") {
            let mut legacy = object.clone();
            if !legacy.get("version").map_or(false, Value::is_u64) {
                legacy.insert("version".to_string(), Value::from(LEGACY_LOCK_VERSION));
            }
            let envelope: EncryptedEnvelope = serde_json::from_value(Value::Object(legacy))
                .map_err(|e| LockError::InvalidEnvelope(format!("legacy envelope: {}", e)))?;
            return Ok(LockEnvelope::Legacy(envelope));
        }

        Err(LockError::InvalidEnvelope(
            "lock payload has neither payload nor ciphertext".to_string(),
        ))
    }

    /// Normalize both shapes into the single internal representation
    pub fn into_payload(self) -> NoteLockPayload {
        match self {
            LockEnvelope::Current(payload) => payload,
            LockEnvelope::Legacy(envelope) => NoteLockPayload {
                version: envelope.version,
                payload: envelope,
                attachments: Vec::new(),
            },
        }
    }
}

/// Parse a note's lock field, reporting why it is unusable
pub fn parse_lock_payload_strict(raw: Option<&str>) -> LockResult<NoteLockPayload> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| LockError::InvalidEnvelope("lock payload is empty".to_string()))?;
    Ok(LockEnvelope::decode(raw)?.into_payload())
}

/// Parse a note's lock field. Empty, malformed or unknown shapes give `None`.
pub fn parse_lock_payload(raw: Option<&str>) -> Option<NoteLockPayload> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    match LockEnvelope::decode(raw) {
        Ok(envelope) => Some(envelope.into_payload()),
        Err(e) => {
            log::warn!("Failed to parse lock payload: {}", e);
            None
        }
    }
}
