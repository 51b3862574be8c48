//! Staging area for plaintext copies of locked attachments
//!
//! Files here only live as long as an unlock session. Nothing in the
//! permanent attachment store is ever written during unlock.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::encryption::{LockError, LockResult};
use crate::storage::{
    extension_from_name, uri_to_path, Attachment, AttachmentKind, FileStore, InlineAttachment,
};

#[derive(Clone)]
pub struct StagingArea {
    files: Arc<dyn FileStore>,
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(files: Arc<dyn FileStore>, dir: PathBuf) -> Self {
        Self { files, dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write plaintext bytes to a fresh staging file and describe it as an
    /// attachment. A failed write leaves no file behind.
    pub fn stage(
        &self,
        id: &str,
        kind: AttachmentKind,
        name: Option<String>,
        mime_type: Option<String>,
        bytes: &[u8],
    ) -> LockResult<Attachment> {
        let safe_id = sanitize_attachment_id(id);
        let extension = extension_from_name(name.as_deref(), kind);
        let relative = self
            .dir
            .join(format!("{}-{}.{}", safe_id, Uuid::new_v4().simple(), extension));

        if let Err(e) = self.files.write(&relative, bytes) {
            remove_best_effort(self.files.as_ref(), &relative, "partial staged attachment");
            return Err(LockError::attachment_io(relative, e));
        }

        Ok(Attachment {
            name: Some(name.unwrap_or_else(|| format!("{}-{}.{}", kind.as_str(), safe_id, extension))),
            mime_type: Some(mime_type.unwrap_or_else(|| kind.mime_type_for(&extension))),
            id: safe_id,
            kind,
            uri: relative_path_string(&relative),
        })
    }

    /// Decode an attachment embedded as base64 in a legacy payload and stage it
    pub fn stage_inline(&self, inline: &InlineAttachment) -> LockResult<Attachment> {
        let data = inline.data.as_deref().ok_or_else(|| {
            LockError::InvalidEnvelope(format!("inline attachment {} has no data", inline.id))
        })?;
        let mut bytes = BASE64.decode(data.trim()).map_err(|e| {
            LockError::InvalidEnvelope(format!("inline attachment {}: {}", inline.id, e))
        })?;

        let staged = self.stage(
            &inline.id,
            inline.kind,
            inline.name.clone(),
            inline.mime_type.clone(),
            &bytes,
        );
        bytes.zeroize();
        staged
    }

    /// Whether an attachment's file lives in this staging area
    pub fn contains(&self, attachment: &Attachment) -> bool {
        let path = uri_to_path(&attachment.uri);
        if path.is_absolute() {
            path.starts_with(self.files.root().join(&self.dir))
        } else {
            path.starts_with(&self.dir)
        }
    }

    /// Delete staged copies. Failures are logged and skipped.
    pub fn discard(&self, attachments: &[Attachment]) {
        for attachment in attachments {
            remove_best_effort(
                self.files.as_ref(),
                &uri_to_path(&attachment.uri),
                "staged attachment",
            );
        }
    }

    /// Remove everything in the staging area, e.g. plaintext left behind by
    /// a session that never got to close. Returns the number of files removed.
    pub fn purge(&self) -> usize {
        let entries = match self.files.list(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Failed to list staging area {:?}: {}", self.dir, e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries {
            match self.files.remove(&entry) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to purge staged file {:?}: {}", entry, e),
            }
        }
        if removed > 0 {
            log::info!("Purged {} leftover staged attachment(s)", removed);
        }
        removed
    }
}

/// Keep ids made of `[A-Za-z0-9_-]`, replace anything else with a new UUID
pub fn sanitize_attachment_id(value: &str) -> String {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        value.to_string()
    } else {
        Uuid::new_v4().to_string()
    }
}

/// Render a relative path with `/` separators so it stays portable
pub(crate) fn relative_path_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub(crate) fn remove_best_effort(files: &dyn FileStore, path: &Path, what: &str) {
    match files.remove(path) {
        Ok(()) => log::debug!("Removed {} {:?}", what, path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("{} {:?} already gone", what, path)
        }
        Err(e) => log::warn!("Failed to remove {} {:?}: {}", what, path, e),
    }
}
