use anyhow::{Context, Result};

use crate::app::App;

pub fn run(app: &App, query: &str) -> Result<()> {
    let note = app.find_note(query)?;
    app.service
        .delete_note(note.id)
        .with_context(|| format!("Failed to delete '{}'", note.title))?;
    println!("Deleted '{}'", note.title);
    Ok(())
}
