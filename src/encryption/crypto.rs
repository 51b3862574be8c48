//! Cryptographic primitives: scrypt key derivation and ChaCha20-Poly1305

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

use super::errors::{LockError, LockResult};
use super::models::{
    EncryptionKey, KEY_SIZE, NONCE_SIZE, SALT_SIZE, SCRYPT_LOG_N, SCRYPT_P, SCRYPT_R, TAG_SIZE,
};

/// Generate a random salt for key derivation
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Generate a random nonce for encryption
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Derive an encryption key from a password using scrypt
pub fn derive_key(password: &str, salt: &[u8]) -> LockResult<EncryptionKey> {
    if salt.len() != SALT_SIZE {
        return Err(LockError::InvalidEnvelope(format!(
            "Invalid salt size: expected {}, got {}",
            SALT_SIZE,
            salt.len()
        )));
    }

    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_SIZE)
        .map_err(|e| LockError::KeyDerivationFailed(e.to_string()))?;

    let mut key = [0u8; KEY_SIZE];
    scrypt::scrypt(password.as_bytes(), salt, &params, &mut key)
        .map_err(|e| LockError::KeyDerivationFailed(e.to_string()))?;

    let derived = EncryptionKey::new(key);
    zeroize::Zeroize::zeroize(&mut key);
    Ok(derived)
}

/// Encrypt data using ChaCha20-Poly1305. The tag is appended to the output.
pub fn encrypt(key: &EncryptionKey, nonce_bytes: &[u8], plaintext: &[u8]) -> LockResult<Vec<u8>> {
    check_nonce(nonce_bytes)?;

    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|e| LockError::EncryptionFailed(e.to_string()))?;

    cipher
        .encrypt(Nonce::from_slice(nonce_bytes), plaintext)
        .map_err(|e| LockError::EncryptionFailed(e.to_string()))
}

/// Decrypt `ciphertext || tag` using ChaCha20-Poly1305.
///
/// Any failure after the nonce check is [`LockError::AuthenticationFailure`];
/// no plaintext is returned unless the tag verifies.
pub fn decrypt(key: &EncryptionKey, nonce_bytes: &[u8], ciphertext: &[u8]) -> LockResult<Vec<u8>> {
    check_nonce(nonce_bytes)?;

    if ciphertext.len() < TAG_SIZE {
        return Err(LockError::AuthenticationFailure);
    }

    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| LockError::AuthenticationFailure)?;

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| LockError::AuthenticationFailure)
}

fn check_nonce(nonce_bytes: &[u8]) -> LockResult<()> {
    if nonce_bytes.len() != NONCE_SIZE {
        return Err(LockError::InvalidEnvelope(format!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce_bytes.len()
        )));
    }
    Ok(())
}

/// Decode a hex field of an envelope or descriptor
pub(crate) fn decode_hex(field: &str, value: &str) -> LockResult<Vec<u8>> {
    hex::decode(value).map_err(|e| LockError::InvalidEnvelope(format!("{}: {}", field, e)))
}
