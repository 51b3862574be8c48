pub mod delete;
pub mod inspect;
pub mod list;
pub mod lock;
pub mod new;
pub mod sweep;
pub mod unlock;

use notelock::storage::NoteRecord;
use notelock::UnlockedNote;

/// The editable note behind a locked record
pub fn draft_from(note: &NoteRecord, unlocked: &UnlockedNote) -> NoteRecord {
    NoteRecord {
        content: unlocked.payload.content.clone(),
        plain_text: unlocked.payload.plain_text.clone(),
        checklist: unlocked.payload.checklist.clone(),
        links: unlocked.payload.links.clone(),
        attachments: unlocked.attachments.clone(),
        ..note.clone()
    }
}
