use anyhow::{bail, Context, Result};

use super::draft_from;
use crate::app::App;
use crate::render::terminal::{self, Color};
use crate::OutputFormat;

pub async fn run(
    app: &App,
    query: &str,
    password: Option<String>,
    remove_lock: bool,
    format: &OutputFormat,
    use_color: bool,
) -> Result<()> {
    let note = app.find_note(query)?;
    if !note.is_locked {
        bail!("'{}' is not locked", note.title);
    }
    let password = password.context("A password is required (--password or NOTELOCK_PASSWORD)")?;

    let session = app.service.open_session(note.id)?;
    let unlocked = session
        .unlock(&password, |p| terminal::print_progress("Decrypting", p))
        .await
        .context("Failed to unlock note")?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "id": note.id.to_string(),
                "title": note.title,
                "payload": unlocked.payload,
                "attachments": unlocked.attachments,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("{}", terminal::paint(&note.title, Color::BOLD, use_color));
            println!();
            println!(
                "{}",
                terminal::render_payload(&unlocked.payload, &unlocked.attachments, use_color)
            );
        }
    }

    if remove_lock {
        let draft = draft_from(&note, &unlocked);
        app.service
            .save_unlocked(&session, &draft)
            .context("Failed to remove the lock")?;
        eprintln!("Lock removed from '{}'", note.title);
    }

    // Staged plaintext copies go away with the session
    session.close();
    Ok(())
}
