/// A note row as stored in the authoritative table. Never physically removed;
/// `deleted` is the tombstone that keeps deletions convergent.
#[derive(Clone, Debug, PartialEq)]
pub struct Note {
    pub uuid: String,
    pub title: String,
    pub contents: String,
    pub created_at: String,
    pub last_updated: String,
    pub embedding: Option<Vec<f32>>,
    /// Comma-separated tag string; hashed byte-for-byte, never normalised.
    pub tags: String,
    pub deleted: bool,
    pub note_hash: String,
}

impl Note {
    /// The text every index and embedding is computed from.
    pub fn search_text(&self) -> String {
        format!("{} {} {}", self.title, self.contents, self.tags)
    }
}

/// A fully specified row for the apply path, where the originating device has
/// already chosen the identity and both timestamps.
#[derive(Clone, Debug)]
pub struct NoteDraft {
    pub uuid: String,
    pub title: String,
    pub contents: String,
    pub created_at: String,
    pub last_updated: String,
    pub embedding: Option<Vec<f32>>,
    pub tags: String,
}

/// Partial update; `None` means "unchanged".
#[derive(Clone, Debug, Default)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub contents: Option<String>,
    pub tags: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl NoteUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.contents.is_none()
            && self.tags.is_none()
            && self.embedding.is_none()
    }
}

/// Little-endian f32 layout used for the `embeddings` blob column and for
/// content hashing; identical bytes on every device for identical vectors.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
