use anyhow::Result;

use crate::app::App;
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub fn run(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let notes = app.list_notes()?;

    match format {
        OutputFormat::Json => {
            let output: Vec<_> = notes
                .iter()
                .map(|note| {
                    serde_json::json!({
                        "id": note.id.to_string(),
                        "title": note.title,
                        "isLocked": note.is_locked,
                        "attachments": note.attachments.len(),
                        "updatedAt": note.updated_at.to_rfc3339(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            if notes.is_empty() {
                println!("(no notes)");
            }
            for note in &notes {
                let marker = if note.is_locked {
                    paint("[locked]", Color::YELLOW, use_color)
                } else {
                    "        ".to_string()
                };
                println!(
                    "{} {} {}",
                    marker,
                    note.title,
                    paint(&note.id.to_string(), Color::DIM, use_color)
                );
            }
        }
    }

    Ok(())
}
