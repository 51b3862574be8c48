//! Storage layout configuration, read from `notelock.toml` in the storage root

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::storage::{LocalFileStore, StorageError};

/// Name of the optional config file inside the storage root
pub const CONFIG_FILE_NAME: &str = "notelock.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config path must be relative to the storage root: {0}")]
    InvalidPath(String),

    #[error("Config directories must not overlap: {0} and {1}")]
    OverlappingDirs(String, String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Directory layout used by the lock subsystem.
///
/// All directories are relative to `storage_root` so that descriptors stay
/// portable across backup and restore. The KDF cost is fixed and has no
/// setting here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", default)]
pub struct LockConfig {
    #[serde(skip)]
    pub storage_root: PathBuf,
    /// Permanent plaintext attachments of unlocked notes
    pub attachments_dir: PathBuf,
    /// Encrypted attachment blobs referenced by descriptors
    pub locked_attachments_dir: PathBuf,
    /// Plaintext copies materialized while a note is unlocked
    pub staging_dir: PathBuf,
    /// Note records of the JSON note store
    pub notes_dir: PathBuf,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::new(),
            attachments_dir: PathBuf::from("attachments"),
            locked_attachments_dir: PathBuf::from("locked-attachments"),
            staging_dir: PathBuf::from("unlocked-staging"),
            notes_dir: PathBuf::from("notes"),
        }
    }
}

impl LockConfig {
    /// Defaults rooted at `storage_root`
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Self::default()
        }
    }

    /// Default storage root in the platform data directory
    pub fn default_root() -> Result<PathBuf, ConfigError> {
        Ok(LocalFileStore::default_data_dir()?)
    }

    /// Load `<root>/notelock.toml`, or defaults when the file is absent
    pub fn load(storage_root: &Path) -> Result<Self, ConfigError> {
        let path = storage_root.join(CONFIG_FILE_NAME);
        if !path.exists() {
            log::debug!("No {} in {:?}, using defaults", CONFIG_FILE_NAME, storage_root);
            return Ok(Self::new(storage_root));
        }

        let content = fs::read_to_string(&path)?;
        let mut config: LockConfig = toml::from_str(&content)?;
        config.storage_root = storage_root.to_path_buf();
        config.validate()?;

        log::info!("Loaded lock config from {:?}", path);
        Ok(config)
    }

    /// Every directory must sit below the root and none may contain another
    fn validate(&self) -> Result<(), ConfigError> {
        let dirs = [
            &self.attachments_dir,
            &self.locked_attachments_dir,
            &self.staging_dir,
            &self.notes_dir,
        ];
        for dir in dirs {
            if !crate::storage::is_contained_relative(dir) {
                return Err(ConfigError::InvalidPath(dir.display().to_string()));
            }
        }

        let normalized: Vec<PathBuf> = dirs.iter().map(|dir| normalize(dir)).collect();
        for (i, a) in normalized.iter().enumerate() {
            for b in &normalized[i + 1..] {
                if a.starts_with(b) || b.starts_with(a) {
                    return Err(ConfigError::OverlappingDirs(
                        a.display().to_string(),
                        b.display().to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Drop `.` components so `./attachments` and `attachments` compare equal
fn normalize(dir: &Path) -> PathBuf {
    dir.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
