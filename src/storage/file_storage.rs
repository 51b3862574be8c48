use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Note not found: {0}")]
    NoteNotFound(Uuid),

    #[error("Data directory not found")]
    DataDirNotFound,
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Byte level file access used by the lock subsystem.
///
/// Relative paths resolve against the storage root. Absolute paths are used
/// as they are, which is how attachments picked from elsewhere get read.
pub trait FileStore: Send + Sync {
    /// The storage root relative paths resolve against
    fn root(&self) -> &Path;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write a file, creating missing parent directories
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool;

    /// Files directly inside `dir`, as paths relative to the root.
    /// A missing directory lists as empty.
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root().join(path)
        }
    }
}

/// [`FileStore`] on top of `std::fs`
pub struct LocalFileStore {
    base_path: PathBuf,
}

impl LocalFileStore {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|p| p.join("notelock"))
            .ok_or(StorageError::DataDirNotFound)
    }

    /// Initialize the storage root
    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path)?;
        Ok(())
    }
}

impl FileStore for LocalFileStore {
    fn root(&self) -> &Path {
        &self.base_path
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(path))
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, data)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let full = self.resolve(dir);
        if !full.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&full)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(dir.join(entry.file_name()));
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Strip a `file://` scheme so attachment uris can be used as paths
pub fn uri_to_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

/// A path that stays inside the storage root: relative, no `..`, no prefix,
/// and naming something below the root rather than the root itself
pub fn is_contained_relative(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::Normal(_)))
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
