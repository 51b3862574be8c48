//! Note record persistence
//!
//! The lock subsystem only needs the opaque lock field, but the save and
//! delete flows move whole records, so the store exposes both.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use uuid::Uuid;

use super::file_storage::{Result, StorageError};
use super::models::NoteRecord;

pub trait NoteStore: Send + Sync {
    fn get(&self, id: Uuid) -> Result<NoteRecord>;

    /// Insert or replace a record
    fn put(&self, note: &NoteRecord) -> Result<()>;

    fn delete(&self, id: Uuid) -> Result<()>;

    fn list(&self) -> Result<Vec<NoteRecord>>;

    fn get_lock_field(&self, id: Uuid) -> Result<Option<String>> {
        Ok(self.get(id)?.lock_payload)
    }

    fn put_lock_field(&self, id: Uuid, lock_payload: Option<String>) -> Result<()> {
        let mut note = self.get(id)?;
        note.lock_payload = lock_payload;
        self.put(&note)
    }
}

/// One pretty-printed JSON file per note in `notes_dir`
pub struct JsonNoteStore {
    notes_dir: PathBuf,
    // Serializes read-modify-write sequences like put_lock_field
    write_lock: Mutex<()>,
}

impl JsonNoteStore {
    pub fn new(notes_dir: PathBuf) -> Self {
        Self {
            notes_dir,
            write_lock: Mutex::new(()),
        }
    }

    fn notes_dir(&self) -> &Path {
        &self.notes_dir
    }

    fn note_path(&self, id: Uuid) -> PathBuf {
        self.notes_dir().join(format!("{}.json", id))
    }

    fn write_note(&self, note: &NoteRecord) -> Result<()> {
        fs::create_dir_all(self.notes_dir())?;
        let content = serde_json::to_string_pretty(note)?;
        fs::write(self.note_path(note.id), content)?;
        Ok(())
    }
}

impl NoteStore for JsonNoteStore {
    fn get(&self, id: Uuid) -> Result<NoteRecord> {
        let path = self.note_path(id);

        if !path.exists() {
            return Err(StorageError::NoteNotFound(id));
        }

        let content = fs::read_to_string(&path)?;
        let note: NoteRecord = serde_json::from_str(&content)?;
        Ok(note)
    }

    fn put(&self, note: &NoteRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.write_note(note)
    }

    fn delete(&self, id: Uuid) -> Result<()> {
        let path = self.note_path(id);

        if !path.exists() {
            return Err(StorageError::NoteNotFound(id));
        }

        fs::remove_file(&path)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<NoteRecord>> {
        let notes_dir = self.notes_dir();

        if !notes_dir.exists() {
            return Ok(Vec::new());
        }

        let mut notes = Vec::new();

        for entry in fs::read_dir(notes_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() && path.extension().map_or(false, |e| e == "json") {
                let content = fs::read_to_string(&path)?;
                let note: NoteRecord = serde_json::from_str(&content)?;
                notes.push(note);
            }
        }

        // Pinned first, then most recently updated
        notes.sort_by(|a, b| b.pinned.cmp(&a.pinned).then(b.updated_at.cmp(&a.updated_at)));

        Ok(notes)
    }

    fn put_lock_field(&self, id: Uuid, lock_payload: Option<String>) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut note = self.get(id)?;
        note.lock_payload = lock_payload;
        self.write_note(&note)
    }
}
