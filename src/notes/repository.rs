use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::notes::hash::compute_note_hash;
use crate::notes::types::{embedding_from_bytes, embedding_to_bytes, Note, NoteDraft, NoteUpdate};
use crate::persistence::{PersistenceResult, PersistenceWorker};
use crate::util::time::now_iso8601;

const NOTE_COLUMNS: &str =
    "uuid, title, contents, created_at, last_updated, embeddings, tags, deleted, note_hash";

/// The authoritative note table. Every write recomputes `note_hash` from the
/// post-image and bumps `last_updated`; rows are tombstoned, never removed.
#[derive(Clone)]
pub struct NotesRepository {
    worker: PersistenceWorker,
}

impl NotesRepository {
    pub fn new(worker: PersistenceWorker) -> Self {
        Self { worker }
    }

    pub async fn initialize(&self) -> PersistenceResult<()> {
        self.worker
            .submit(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS notes(
                        uuid TEXT PRIMARY KEY,
                        title TEXT,
                        contents TEXT,
                        created_at DATETIME,
                        last_updated DATETIME,
                        embeddings BLOB,
                        tags TEXT,
                        deleted BOOLEAN DEFAULT 0,
                        note_hash TEXT)",
                    [],
                )?;
                Ok(())
            })
            .await
    }

    /// Creates a note locally, generating its identity and timestamps.
    pub async fn create(
        &self,
        title: impl Into<String>,
        contents: impl Into<String>,
        tags: impl Into<String>,
        embedding: Option<Vec<f32>>,
    ) -> PersistenceResult<String> {
        let (title, contents, tags) = (title.into(), contents.into(), tags.into());
        self.worker
            .submit(move |conn| {
                let uuid = Uuid::new_v4().to_string();
                let now = now_iso8601();
                let blob = embedding.as_deref().map(embedding_to_bytes);
                let note_hash =
                    compute_note_hash(&title, &contents, &tags, blob.as_deref(), false);
                conn.execute(
                    "INSERT INTO notes (uuid, title, contents, created_at, last_updated, embeddings, tags, note_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![uuid, title, contents, now, now, blob, tags, note_hash],
                )?;
                Ok(uuid)
            })
            .await
    }

    /// Inserts a note whose identity and timestamps were chosen by the
    /// originating device (the sync apply path).
    pub async fn insert(&self, draft: NoteDraft) -> PersistenceResult<()> {
        self.worker
            .submit(move |conn| {
                let blob = draft.embedding.as_deref().map(embedding_to_bytes);
                let note_hash = compute_note_hash(
                    &draft.title,
                    &draft.contents,
                    &draft.tags,
                    blob.as_deref(),
                    false,
                );
                conn.execute(
                    "INSERT INTO notes (uuid, title, contents, created_at, last_updated, embeddings, tags, note_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        draft.uuid,
                        draft.title,
                        draft.contents,
                        draft.created_at,
                        draft.last_updated,
                        blob,
                        draft.tags,
                        note_hash
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Applies a partial update; absent fields stay unchanged. Returns false
    /// when no note with this uuid exists.
    pub async fn update(&self, uuid: &str, update: NoteUpdate) -> PersistenceResult<bool> {
        let uuid = uuid.to_string();
        self.worker
            .submit(move |conn| {
                let Some(current) = fetch_note(conn, &uuid)? else {
                    return Ok(false);
                };
                if update.is_empty() {
                    return Ok(true);
                }

                let title = update.title.unwrap_or(current.title);
                let contents = update.contents.unwrap_or(current.contents);
                let tags = update.tags.unwrap_or(current.tags);
                let embedding = update.embedding.or(current.embedding);

                let blob = embedding.as_deref().map(embedding_to_bytes);
                let note_hash =
                    compute_note_hash(&title, &contents, &tags, blob.as_deref(), current.deleted);
                let now = now_iso8601();

                conn.execute(
                    "UPDATE notes SET title = ?1, contents = ?2, embeddings = ?3, tags = ?4,
                        note_hash = ?5, last_updated = ?6 WHERE uuid = ?7",
                    params![title, contents, blob, tags, note_hash, now, uuid],
                )?;
                Ok(true)
            })
            .await
    }

    /// Sets the tombstone, preserving prior content. Idempotent. Returns
    /// false when no note with this uuid exists.
    pub async fn mark_deleted(&self, uuid: &str) -> PersistenceResult<bool> {
        let uuid = uuid.to_string();
        self.worker
            .submit(move |conn| {
                let Some(current) = fetch_note(conn, &uuid)? else {
                    return Ok(false);
                };

                let blob = current.embedding.as_deref().map(embedding_to_bytes);
                let note_hash = compute_note_hash(
                    &current.title,
                    &current.contents,
                    &current.tags,
                    blob.as_deref(),
                    true,
                );
                let now = now_iso8601();

                conn.execute(
                    "UPDATE notes SET deleted = 1, note_hash = ?1, last_updated = ?2 WHERE uuid = ?3",
                    params![note_hash, now, uuid],
                )?;
                Ok(true)
            })
            .await
    }

    pub async fn get(&self, uuid: &str) -> PersistenceResult<Option<Note>> {
        let uuid = uuid.to_string();
        self.worker
            .submit(move |conn| Ok(fetch_note(conn, &uuid)?))
            .await
    }

    pub async fn list(&self, include_deleted: bool) -> PersistenceResult<Vec<Note>> {
        self.worker
            .submit(move |conn| {
                let sql = if include_deleted {
                    format!("SELECT {NOTE_COLUMNS} FROM notes ORDER BY created_at")
                } else {
                    format!("SELECT {NOTE_COLUMNS} FROM notes WHERE deleted != 1 ORDER BY created_at")
                };
                let mut stmt = conn.prepare(&sql)?;
                let notes = stmt
                    .query_map([], note_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(notes)
            })
            .await
    }

    pub async fn count_non_deleted(&self) -> PersistenceResult<u64> {
        self.worker
            .submit(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM notes WHERE deleted = 0", [], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
    }
}

fn fetch_note(conn: &Connection, uuid: &str) -> rusqlite::Result<Option<Note>> {
    conn.query_row(
        &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE uuid = ?1"),
        [uuid],
        note_from_row,
    )
    .optional()
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    let blob: Option<Vec<u8>> = row.get(5)?;
    Ok(Note {
        uuid: row.get(0)?,
        title: row.get(1)?,
        contents: row.get(2)?,
        created_at: row.get(3)?,
        last_updated: row.get(4)?,
        embedding: blob.map(|bytes| embedding_from_bytes(&bytes)),
        tags: row.get(6)?,
        deleted: row.get(7)?,
        note_hash: row.get(8)?,
    })
}
