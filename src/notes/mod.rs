mod hash;
mod repository;
mod types;

pub use hash::compute_note_hash;
pub use repository::NotesRepository;
pub use types::{embedding_from_bytes, embedding_to_bytes, Note, NoteDraft, NoteUpdate};
