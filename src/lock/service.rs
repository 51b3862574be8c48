//! Save, delete and maintenance flows over the note store
//!
//! The session decides what the new record looks like; this layer persists
//! it and only then lets the session clean up the files the old record used.

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use super::attachments::AttachmentLockManager;
use super::payload::{parse_lock_payload, LockedAttachmentDescriptor};
use super::session::NoteLockSession;
use crate::config::LockConfig;
use crate::encryption::LockResult;
use crate::storage::{FileStore, JsonNoteStore, LocalFileStore, NoteRecord, NoteStore, StorageError};

pub struct NoteLockService {
    notes: Arc<dyn NoteStore>,
    manager: AttachmentLockManager,
}

impl NoteLockService {
    pub fn new(notes: Arc<dyn NoteStore>, files: Arc<dyn FileStore>, config: &LockConfig) -> Self {
        Self {
            notes,
            manager: AttachmentLockManager::new(files, config),
        }
    }

    /// Local JSON notes and files under `config.storage_root`. Plaintext
    /// left in the staging area by a previous run is removed here.
    pub fn open(config: &LockConfig) -> Result<Self, StorageError> {
        let files = LocalFileStore::new(config.storage_root.clone());
        files.init()?;
        let notes = JsonNoteStore::new(config.storage_root.join(&config.notes_dir));

        let service = Self::new(Arc::new(notes), Arc::new(files), config);
        service.purge_staging();
        Ok(service)
    }

    pub fn notes(&self) -> &Arc<dyn NoteStore> {
        &self.notes
    }

    pub fn manager(&self) -> &AttachmentLockManager {
        &self.manager
    }

    pub fn open_session(&self, note_id: Uuid) -> LockResult<NoteLockSession> {
        let record = self.notes.get(note_id)?;
        Ok(NoteLockSession::open(&record, self.manager.clone()))
    }

    /// Save `draft` with the lock on. `password` may be omitted when the
    /// session already holds one. The persisted record is returned.
    pub async fn save_locked<F>(
        &self,
        session: &NoteLockSession,
        draft: &NoteRecord,
        password: Option<&str>,
        on_progress: F,
    ) -> LockResult<NoteRecord>
    where
        F: FnMut(f32),
    {
        let pending = session.seal(draft, password, on_progress).await?;
        if let Err(e) = self.notes.put(&pending.record) {
            log::error!("Failed to persist locked note {}: {}", draft.id, e);
            pending.rollback();
            return Err(e.into());
        }
        let record = pending.record.clone();
        session.commit(pending);
        Ok(record)
    }

    /// Save `draft` with the lock off, removing the note's encrypted files
    pub fn save_unlocked(&self, session: &NoteLockSession, draft: &NoteRecord) -> LockResult<NoteRecord> {
        let pending = session.unseal(draft)?;
        if let Err(e) = self.notes.put(&pending.record) {
            log::error!("Failed to persist note {}: {}", draft.id, e);
            pending.rollback();
            return Err(e.into());
        }
        let record = pending.record.clone();
        session.commit(pending);
        Ok(record)
    }

    /// Delete a note together with its plaintext and encrypted files
    pub fn delete_note(&self, note_id: Uuid) -> LockResult<()> {
        let record = self.notes.get(note_id)?;

        self.manager.remove_plaintext_attachments(&record.attachments);
        if let Some(lock) = parse_lock_payload(record.lock_payload.as_deref()) {
            self.manager.remove_locked_attachments(&lock.attachments);
        }

        self.notes.delete(note_id)?;
        log::info!("Deleted note {}", note_id);
        Ok(())
    }

    /// Encrypted files no locked note references any more
    pub fn find_orphaned_locked_files(&self) -> LockResult<Vec<PathBuf>> {
        let referenced: Vec<LockedAttachmentDescriptor> = self
            .notes
            .list()?
            .iter()
            .filter(|note| note.is_locked)
            .filter_map(|note| parse_lock_payload(note.lock_payload.as_deref()))
            .flat_map(|lock| lock.attachments)
            .collect();
        self.manager.find_orphaned_locked_files(&referenced)
    }

    /// Remove orphaned encrypted files; returns how many were deleted
    pub fn remove_orphaned_locked_files(&self) -> LockResult<usize> {
        let orphans = self.find_orphaned_locked_files()?;
        let mut removed = 0;
        for path in &orphans {
            match self.manager.files().remove(path) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Failed to remove orphaned file {:?}: {}", path, e),
            }
        }
        Ok(removed)
    }

    pub fn purge_staging(&self) -> usize {
        self.manager.staging().purge()
    }
}
