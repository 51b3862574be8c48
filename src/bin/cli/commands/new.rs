use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use notelock::storage::{extension_from_name, plain_text_preview, Attachment, AttachmentKind, NoteRecord};

use crate::app::App;
use crate::OutputFormat;

pub fn run(
    app: &App,
    title: &str,
    content: Option<String>,
    attachments: &[PathBuf],
    format: &OutputFormat,
) -> Result<()> {
    let mut note = NoteRecord::new(title.to_string());
    if let Some(content) = content {
        note.plain_text = plain_text_preview(&content);
        note.content = content;
    }

    for source in attachments {
        note.attachments.push(import_attachment(app, source)?);
    }

    app.service
        .notes()
        .put(&note)
        .context("Failed to save note")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&note)?);
        }
        OutputFormat::Plain => {
            println!("Created '{}' ({})", note.title, note.id);
        }
    }

    Ok(())
}

/// Copy a file into the attachment store
fn import_attachment(app: &App, source: &Path) -> Result<Attachment> {
    let bytes = std::fs::read(source)
        .with_context(|| format!("Failed to read {}", source.display()))?;

    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    let kind = kind_for(source);
    let extension = extension_from_name(name.as_deref(), kind);
    let id = Uuid::new_v4().to_string();
    let relative = app
        .config
        .attachments_dir
        .join(format!("{}.{}", id, extension));

    app.service
        .manager()
        .files()
        .write(&relative, &bytes)
        .with_context(|| format!("Failed to store {}", relative.display()))?;

    Ok(Attachment {
        id,
        kind,
        uri: relative.to_string_lossy().replace('\\', "/"),
        mime_type: Some(kind.mime_type_for(&extension)),
        name,
    })
}

fn kind_for(path: &Path) -> AttachmentKind {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "m4a" | "mp3" | "wav" | "aac" | "ogg" | "flac" => AttachmentKind::Audio,
        "mp4" | "mov" | "m4v" | "webm" | "mkv" => AttachmentKind::Video,
        _ => AttachmentKind::Image,
    }
}
