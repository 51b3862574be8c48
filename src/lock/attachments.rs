//! Per-attachment encryption
//!
//! Every attachment gets its own salt, nonce and encrypted file, so a note
//! can be decrypted one attachment at a time. Descriptors only ever hold
//! paths relative to the storage root.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use super::payload::LockedAttachmentDescriptor;
use super::staging::{relative_path_string, remove_best_effort, sanitize_attachment_id, StagingArea};
use crate::config::LockConfig;
use crate::encryption::crypto::decode_hex;
use crate::encryption::{
    decrypt, derive_key, encrypt, generate_nonce, generate_salt, LockError, LockResult,
    ATTACHMENT_VERSION,
};
use crate::encryption::models::{NONCE_SIZE, SALT_SIZE};
use crate::storage::{is_contained_relative, uri_to_path, Attachment, FileStore};

/// One attachment encrypted in memory and not yet stored
pub struct EncryptedAttachment {
    attachment: Attachment,
    salt: [u8; SALT_SIZE],
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
    size: u64,
}

#[derive(Clone)]
pub struct AttachmentLockManager {
    files: Arc<dyn FileStore>,
    locked_dir: PathBuf,
    attachments_dir: PathBuf,
    staging: StagingArea,
}

impl AttachmentLockManager {
    pub fn new(files: Arc<dyn FileStore>, config: &LockConfig) -> Self {
        Self {
            staging: StagingArea::new(Arc::clone(&files), config.staging_dir.clone()),
            files,
            locked_dir: config.locked_attachments_dir.clone(),
            attachments_dir: config.attachments_dir.clone(),
        }
    }

    pub fn files(&self) -> &Arc<dyn FileStore> {
        &self.files
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Encrypt one attachment into a new file under the locked directory
    pub fn lock_attachment(
        &self,
        attachment: &Attachment,
        password: &str,
    ) -> LockResult<LockedAttachmentDescriptor> {
        let encrypted = self.encrypt_attachment(attachment, password)?;
        self.write_encrypted(encrypted)
    }

    /// Read and encrypt one attachment in memory. Nothing is written; the
    /// result goes to [`write_encrypted`](Self::write_encrypted).
    pub fn encrypt_attachment(
        &self,
        attachment: &Attachment,
        password: &str,
    ) -> LockResult<EncryptedAttachment> {
        let source = uri_to_path(&attachment.uri);
        let mut plaintext = self
            .files
            .read(&source)
            .map_err(|e| LockError::attachment_io(&source, e))?;
        let size = plaintext.len() as u64;

        let salt = generate_salt();
        let nonce = generate_nonce();
        let sealed = derive_key(password, &salt).and_then(|key| encrypt(&key, &nonce, &plaintext));
        plaintext.zeroize();

        Ok(EncryptedAttachment {
            attachment: attachment.clone(),
            salt,
            nonce,
            ciphertext: sealed?,
            size,
        })
    }

    /// Store an encrypted attachment under a fresh name in the locked
    /// directory and describe it
    pub fn write_encrypted(&self, encrypted: EncryptedAttachment) -> LockResult<LockedAttachmentDescriptor> {
        let EncryptedAttachment {
            attachment,
            salt,
            nonce,
            ciphertext,
            size,
        } = encrypted;

        let relative = self.locked_dir.join(format!(
            "{}-{}.bin",
            sanitize_attachment_id(&attachment.id),
            Uuid::new_v4().simple()
        ));
        if let Err(e) = self.files.write(&relative, &ciphertext) {
            remove_best_effort(self.files.as_ref(), &relative, "partial encrypted attachment");
            return Err(LockError::attachment_io(relative, e));
        }

        log::debug!("Encrypted attachment {} into {:?}", attachment.id, relative);

        Ok(LockedAttachmentDescriptor {
            id: attachment.id,
            kind: attachment.kind,
            name: attachment.name,
            mime_type: attachment.mime_type,
            file: relative_path_string(&relative),
            salt: hex::encode(salt),
            nonce: hex::encode(nonce),
            version: ATTACHMENT_VERSION,
            size: Some(size),
        })
    }

    /// Decrypt one attachment into the staging area.
    /// Nothing is written unless the ciphertext authenticates.
    pub fn unlock_attachment(
        &self,
        descriptor: &LockedAttachmentDescriptor,
        password: &str,
    ) -> LockResult<Attachment> {
        let plaintext = self.decrypt_attachment(descriptor, password)?;
        self.stage_decrypted(descriptor, &plaintext)
    }

    /// Read and decrypt one attachment in memory. The bytes are wiped when
    /// the returned buffer is dropped.
    pub fn decrypt_attachment(
        &self,
        descriptor: &LockedAttachmentDescriptor,
        password: &str,
    ) -> LockResult<Zeroizing<Vec<u8>>> {
        let relative = descriptor_path(descriptor)?;
        let salt = decode_hex("salt", &descriptor.salt)?;
        let nonce = decode_hex("nonce", &descriptor.nonce)?;

        let ciphertext = self
            .files
            .read(&relative)
            .map_err(|e| LockError::attachment_io(&relative, e))?;

        let key = derive_key(password, &salt)?;
        let plaintext = Zeroizing::new(decrypt(&key, &nonce, &ciphertext)?);

        if let Some(expected) = descriptor.size {
            if expected != plaintext.len() as u64 {
                log::warn!(
                    "Attachment {} decrypted to {} bytes, descriptor says {}",
                    descriptor.id,
                    plaintext.len(),
                    expected
                );
            }
        }
        Ok(plaintext)
    }

    /// Write decrypted bytes into the staging area under the descriptor's
    /// name and type
    pub fn stage_decrypted(
        &self,
        descriptor: &LockedAttachmentDescriptor,
        plaintext: &[u8],
    ) -> LockResult<Attachment> {
        self.staging.stage(
            &descriptor.id,
            descriptor.kind,
            descriptor.name.clone(),
            descriptor.mime_type.clone(),
            plaintext,
        )
    }

    /// Delete the encrypted files behind `descriptors`. Failures are logged
    /// and never stop the loop.
    pub fn remove_locked_attachments(&self, descriptors: &[LockedAttachmentDescriptor]) {
        for descriptor in descriptors {
            match descriptor_path(descriptor) {
                Ok(path) => {
                    remove_best_effort(self.files.as_ref(), &path, "encrypted attachment")
                }
                Err(e) => log::warn!("Skipping removal of attachment {}: {}", descriptor.id, e),
            }
        }
    }

    /// Delete plaintext attachment files, e.g. after they were sealed.
    /// Files outside the storage root belong to the user and are left alone.
    pub fn remove_plaintext_attachments(&self, attachments: &[Attachment]) {
        for attachment in attachments {
            if !self.is_in_store(attachment) {
                log::warn!(
                    "Not removing attachment {} outside the storage root: {}",
                    attachment.id,
                    attachment.uri
                );
                continue;
            }
            remove_best_effort(
                self.files.as_ref(),
                &uri_to_path(&attachment.uri),
                "plaintext attachment",
            );
        }
    }

    /// Whether the attachment's file lives under the storage root
    pub fn is_in_store(&self, attachment: &Attachment) -> bool {
        let path = uri_to_path(&attachment.uri);
        if path.is_absolute() {
            match path.strip_prefix(self.files.root()) {
                Ok(relative) => is_contained_relative(relative),
                Err(_) => false,
            }
        } else {
            is_contained_relative(&path)
        }
    }

    /// Copy a staged attachment into the permanent attachment store. Used
    /// when a note is saved with its lock turned off. Attachments that are
    /// not staged are returned unchanged.
    pub fn promote(&self, attachment: &Attachment) -> LockResult<Attachment> {
        if !self.staging.contains(attachment) {
            return Ok(attachment.clone());
        }

        let source = uri_to_path(&attachment.uri);
        let mut bytes = self
            .files
            .read(&source)
            .map_err(|e| LockError::attachment_io(&source, e))?;

        let safe_id = sanitize_attachment_id(&attachment.id);
        let extension = attachment.extension();
        let mut target = self.attachments_dir.join(format!("{}.{}", safe_id, extension));
        if self.files.exists(&target) {
            target = self.attachments_dir.join(format!(
                "{}-{}.{}",
                safe_id,
                Uuid::new_v4().simple(),
                extension
            ));
        }

        let written = self.files.write(&target, &bytes);
        bytes.zeroize();
        if let Err(e) = written {
            remove_best_effort(self.files.as_ref(), &target, "partial promoted attachment");
            return Err(LockError::attachment_io(target, e));
        }

        Ok(Attachment {
            id: safe_id,
            uri: relative_path_string(&target),
            ..attachment.clone()
        })
    }

    /// Encrypted files on disk that none of `referenced` points at
    pub fn find_orphaned_locked_files(
        &self,
        referenced: &[LockedAttachmentDescriptor],
    ) -> LockResult<Vec<PathBuf>> {
        let on_disk = self
            .files
            .list(&self.locked_dir)
            .map_err(|e| LockError::attachment_io(&self.locked_dir, e))?;

        Ok(on_disk
            .into_iter()
            .filter(|path| {
                let rendered = relative_path_string(path);
                !referenced.iter().any(|d| d.file == rendered)
            })
            .collect())
    }
}

/// Resolve a descriptor's file, refusing anything that could leave the
/// storage root
fn descriptor_path(descriptor: &LockedAttachmentDescriptor) -> LockResult<PathBuf> {
    let path = Path::new(&descriptor.file);
    if !is_contained_relative(path) {
        return Err(LockError::InvalidEnvelope(format!(
            "attachment {} points outside the storage root: {}",
            descriptor.id, descriptor.file
        )));
    }
    Ok(path.to_path_buf())
}
