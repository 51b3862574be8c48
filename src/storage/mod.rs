mod file_storage;
mod html_utils;
mod models;
mod note_store;

pub use file_storage::{
    is_contained_relative, uri_to_path, FileStore, LocalFileStore, Result, StorageError,
};
pub use html_utils::plain_text_preview;
pub use models::*;
pub use note_store::{JsonNoteStore, NoteStore};
