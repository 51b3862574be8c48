use anyhow::{Context, Result};

use super::draft_from;
use crate::app::App;
use crate::render::terminal::{self, paint, Color};

pub async fn run(
    app: &App,
    query: &str,
    password: Option<String>,
    current_password: Option<String>,
    use_color: bool,
) -> Result<()> {
    let password = password.context("A password is required (--password or NOTELOCK_PASSWORD)")?;
    let note = app.find_note(query)?;
    let session = app.service.open_session(note.id)?;

    let draft = if note.is_locked {
        let current = current_password
            .context("Note is already locked; pass --current-password to change its password")?;
        let unlocked = session
            .unlock(&current, |p| terminal::print_progress("Decrypting", p))
            .await
            .context("Failed to unlock note")?;
        draft_from(&note, &unlocked)
    } else {
        note.clone()
    };

    let saved = app
        .service
        .save_locked(&session, &draft, Some(password.as_str()), |p| {
            terminal::print_progress("Encrypting", p)
        })
        .await
        .context("Failed to lock note")?;
    session.close();

    println!(
        "{} '{}' with {} attachment(s)",
        paint("Locked", Color::GREEN, use_color),
        saved.title,
        draft.attachments.len()
    );
    Ok(())
}
