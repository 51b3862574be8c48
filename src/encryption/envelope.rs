//! Sealing a note payload into an [`EncryptedEnvelope`] and back

use zeroize::Zeroize;

use super::crypto::{decode_hex, decrypt, derive_key, encrypt, generate_nonce, generate_salt};
use super::errors::{LockError, LockResult};
use super::models::{EncryptedEnvelope, SecureNotePayload, StoredPayload, PAYLOAD_VERSION};
use crate::storage::InlineAttachment;

/// Encrypt a note payload under a fresh salt and nonce
pub fn lock_payload(password: &str, payload: &SecureNotePayload) -> LockResult<EncryptedEnvelope> {
    let salt = generate_salt();
    let nonce = generate_nonce();
    let key = derive_key(password, &salt)?;

    let mut plaintext = serde_json::to_vec(payload)
        .map_err(|e| LockError::EncryptionFailed(e.to_string()))?;
    let sealed = encrypt(&key, &nonce, &plaintext);
    plaintext.zeroize();

    Ok(EncryptedEnvelope {
        version: PAYLOAD_VERSION,
        salt: hex::encode(salt),
        nonce: hex::encode(nonce),
        ciphertext: hex::encode(sealed?),
    })
}

/// Decrypt an envelope produced by [`lock_payload`]
pub fn unlock_payload(password: &str, envelope: &EncryptedEnvelope) -> LockResult<SecureNotePayload> {
    unlock_stored_payload(password, envelope).map(|(note, _)| note)
}

/// Decrypt an envelope and also return any inline attachments that older
/// app versions embedded in the payload
pub fn unlock_payload_with_inline(
    password: &str,
    envelope: &EncryptedEnvelope,
) -> LockResult<(SecureNotePayload, Vec<InlineAttachment>)> {
    unlock_stored_payload(password, envelope)
}

fn unlock_stored_payload(
    password: &str,
    envelope: &EncryptedEnvelope,
) -> LockResult<(SecureNotePayload, Vec<InlineAttachment>)> {
    let salt = decode_hex("salt", &envelope.salt)?;
    let nonce = decode_hex("nonce", &envelope.nonce)?;
    // A ciphertext that is not even hex can only be corruption; keep it on
    // the same path as a failed tag check.
    let ciphertext = hex::decode(&envelope.ciphertext).map_err(|_| LockError::AuthenticationFailure)?;

    let key = derive_key(password, &salt)?;
    let mut plaintext = decrypt(&key, &nonce, &ciphertext)?;

    let parsed = serde_json::from_slice::<StoredPayload>(&plaintext);
    plaintext.zeroize();

    let stored = parsed.map_err(|_| LockError::AuthenticationFailure)?;
    Ok((stored.note, stored.attachments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ChecklistItem, LinkItem};

    fn sample_payload() -> SecureNotePayload {
        SecureNotePayload {
            content: "<p>Groceries</p>".to_string(),
            plain_text: "Groceries".to_string(),
            checklist: vec![ChecklistItem {
                id: "c1".to_string(),
                text: "Milk".to_string(),
                done: true,
            }],
            links: vec![LinkItem {
                id: "l1".to_string(),
                label: "Store".to_string(),
                url: "https://example.com".to_string(),
            }],
        }
    }

    #[test]
    fn test_roundtrip() {
        let payload = sample_payload();
        let envelope = lock_payload("secret", &payload).unwrap();
        assert_eq!(envelope.version, PAYLOAD_VERSION);
        assert_eq!(envelope.salt.len(), 32);
        assert_eq!(envelope.nonce.len(), 24);

        let unlocked = unlock_payload("secret", &envelope).unwrap();
        assert_eq!(unlocked, payload);
    }

    #[test]
    fn test_wrong_password() {
        let envelope = lock_payload("secret", &sample_payload()).unwrap();
        assert!(matches!(
            unlock_payload("not-secret", &envelope),
            Err(LockError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_fresh_salt_and_nonce_per_call() {
        let payload = sample_payload();
        let first = lock_payload("secret", &payload).unwrap();
        let second = lock_payload("secret", &payload).unwrap();
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_single_byte_tamper_is_rejected() {
        let envelope = lock_payload("secret", &sample_payload()).unwrap();
        let bytes = hex::decode(&envelope.ciphertext).unwrap();

        // Flip one byte in the body and one in the tag
        for index in [0, bytes.len() - 1] {
            let mut tampered_bytes = bytes.clone();
            tampered_bytes[index] ^= 0x01;
            let tampered = EncryptedEnvelope {
                ciphertext: hex::encode(&tampered_bytes),
                ..envelope.clone()
            };
            assert!(matches!(
                unlock_payload("secret", &tampered),
                Err(LockError::AuthenticationFailure)
            ));
        }
    }

    #[test]
    fn test_malformed_salt_is_invalid_envelope() {
        let mut envelope = lock_payload("secret", &sample_payload()).unwrap();
        envelope.salt = "zz".to_string();
        assert!(matches!(
            unlock_payload("secret", &envelope),
            Err(LockError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_inline_legacy_attachments_are_returned() {
        use crate::encryption::crypto::{derive_key, encrypt, generate_nonce, generate_salt};

        let legacy = serde_json::json!({
            "content": "<p>old</p>",
            "plainText": "old",
            "checklist": [],
            "links": [],
            "attachments": [
                { "id": "a1", "type": "image", "uri": "file:///old.jpg", "data": "aGVsbG8=" }
            ]
        });
        let salt = generate_salt();
        let nonce = generate_nonce();
        let key = derive_key("secret", &salt).unwrap();
        let ciphertext = encrypt(&key, &nonce, legacy.to_string().as_bytes()).unwrap();
        let envelope = EncryptedEnvelope {
            version: 1,
            salt: hex::encode(salt),
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        };

        let (note, inline) = unlock_payload_with_inline("secret", &envelope).unwrap();
        assert_eq!(note.plain_text, "old");
        assert_eq!(inline.len(), 1);
        assert_eq!(inline[0].data.as_deref(), Some("aGVsbG8="));
    }
}
