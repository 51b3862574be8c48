use anyhow::{Context, Result};

use crate::app::App;
use crate::OutputFormat;

/// Leftover staging files are already purged when the app opens storage;
/// this reports encrypted files no note references.
pub fn run(app: &App, remove: bool, format: &OutputFormat) -> Result<()> {
    let orphans = app
        .service
        .find_orphaned_locked_files()
        .context("Failed to scan encrypted attachments")?;
    let removed = if remove && !orphans.is_empty() {
        app.service.remove_orphaned_locked_files()?
    } else {
        0
    };

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "orphans": orphans.iter().map(|p| p.to_string_lossy()).collect::<Vec<_>>(),
                "removed": removed,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            if orphans.is_empty() {
                println!("No orphaned encrypted files");
            }
            for path in &orphans {
                println!("  {}", path.display());
            }
            if remove {
                println!("Removed {} file(s)", removed);
            } else if !orphans.is_empty() {
                println!("Run with --remove to delete them");
            }
        }
    }

    Ok(())
}
