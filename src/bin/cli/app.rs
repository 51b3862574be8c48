use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use notelock::storage::NoteRecord;
use notelock::{LockConfig, NoteLockService};

/// Shared application state for CLI commands
pub struct App {
    pub config: LockConfig,
    pub service: NoteLockService,
}

impl App {
    /// Open the storage root, reading `notelock.toml` from it if present
    pub fn new(root: Option<PathBuf>) -> Result<Self> {
        let root = match root {
            Some(root) => root,
            None => LockConfig::default_root().context("Failed to get data directory")?,
        };

        let config = LockConfig::load(&root)
            .with_context(|| format!("Failed to load config from {}", root.display()))?;
        let service = NoteLockService::open(&config).context("Failed to open note storage")?;

        Ok(Self { config, service })
    }

    pub fn list_notes(&self) -> Result<Vec<NoteRecord>> {
        self.service.notes().list().context("Failed to list notes")
    }

    /// Find a note by id or title (case-insensitive prefix match)
    pub fn find_note(&self, query: &str) -> Result<NoteRecord> {
        let notes = self.list_notes()?;
        let query_lower = query.to_lowercase();

        // Exact id or title first
        if let Some(note) = notes.iter().find(|n| {
            n.id.to_string() == query_lower || n.title.to_lowercase() == query_lower
        }) {
            return Ok(note.clone());
        }

        let matches: Vec<&NoteRecord> = notes
            .iter()
            .filter(|n| {
                n.id.to_string().starts_with(&query_lower)
                    || n.title.to_lowercase().starts_with(&query_lower)
            })
            .collect();

        match matches.len() {
            0 => bail!("No note matching '{}'", query),
            1 => Ok(matches[0].clone()),
            _ => bail!(
                "Ambiguous note '{}'. Matches:\n{}",
                query,
                matches
                    .iter()
                    .map(|n| format!("  - {} ({})", n.title, n.id))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
        }
    }
}
