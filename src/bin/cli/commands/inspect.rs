use std::path::Path;

use anyhow::Result;

use notelock::lock::parse_lock_payload_strict;

use crate::app::App;
use crate::OutputFormat;

pub fn run(app: &App, query: &str, format: &OutputFormat) -> Result<()> {
    let note = app.find_note(query)?;
    if !note.is_locked {
        println!("'{}' is not locked", note.title);
        return Ok(());
    }

    let lock = match parse_lock_payload_strict(note.lock_payload.as_deref()) {
        Ok(lock) => lock,
        Err(e) => {
            println!("'{}' cannot be unlocked: {}", note.title, e);
            return Ok(());
        }
    };
    let files = app.service.manager().files();

    match format {
        OutputFormat::Json => {
            let attachments: Vec<_> = lock
                .attachments
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "id": d.id,
                        "type": d.kind,
                        "name": d.name,
                        "file": d.file,
                        "size": d.size,
                        "present": files.exists(Path::new(&d.file)),
                    })
                })
                .collect();
            let output = serde_json::json!({
                "id": note.id.to_string(),
                "version": lock.version,
                "legacy": lock.is_legacy(),
                "payloadVersion": lock.payload.version,
                "attachments": attachments,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("{} ({})", note.title, note.id);
            println!(
                "  lock version {}{}, payload version {}",
                lock.version,
                if lock.is_legacy() { " (legacy, inline attachments)" } else { "" },
                lock.payload.version
            );
            for d in &lock.attachments {
                let present = if files.exists(Path::new(&d.file)) { "" } else { " [missing]" };
                println!(
                    "  {} {} {} {}{}",
                    d.kind.as_str(),
                    d.name.as_deref().unwrap_or(&d.id),
                    d.file,
                    d.size.map(|s| format!("{} bytes", s)).unwrap_or_default(),
                    present
                );
            }
        }
    }

    Ok(())
}
