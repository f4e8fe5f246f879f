use rusqlite::{params, OptionalExtension};

use crate::persistence::{PersistenceResult, PersistenceWorker};

/// FTS5-backed full-text index over note titles and contents, supporting
/// phrase and prefix queries that return note identifiers.
#[derive(Clone)]
pub struct LexicalIndex {
    worker: PersistenceWorker,
}

impl LexicalIndex {
    pub fn new(worker: PersistenceWorker) -> Self {
        Self { worker }
    }

    pub async fn initialize(&self) -> PersistenceResult<()> {
        self.worker
            .submit(|conn| {
                conn.execute(
                    "CREATE VIRTUAL TABLE IF NOT EXISTS lexical USING fts5(note_id, title, contents)",
                    [],
                )?;
                Ok(())
            })
            .await
    }

    /// Replaces the indexed row for a note.
    pub async fn index_note(
        &self,
        note_id: &str,
        title: &str,
        contents: &str,
    ) -> PersistenceResult<()> {
        let (note_id, title, contents) =
            (note_id.to_string(), title.to_string(), contents.to_string());
        self.worker
            .submit(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM lexical WHERE note_id = ?1", [&note_id])?;
                tx.execute(
                    "INSERT INTO lexical (note_id, title, contents) VALUES (?1, ?2, ?3)",
                    params![note_id, title, contents],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    pub async fn remove_note(&self, note_id: &str) -> PersistenceResult<()> {
        let note_id = note_id.to_string();
        self.worker
            .submit(move |conn| {
                conn.execute("DELETE FROM lexical WHERE note_id = ?1", [&note_id])?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, note_id: &str) -> PersistenceResult<Option<(String, String)>> {
        let note_id = note_id.to_string();
        self.worker
            .submit(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT title, contents FROM lexical WHERE note_id = ?1",
                        [&note_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?)
            })
            .await
    }

    /// Runs an FTS5 match query (term, phrase or prefix syntax) and returns
    /// the identifiers of matching notes.
    pub async fn search(&self, query: &str) -> PersistenceResult<Vec<String>> {
        let query = query.to_string();
        self.worker
            .submit(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT note_id FROM lexical WHERE lexical MATCH ?1")?;
                let ids = stmt
                    .query_map([&query], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await
    }
}
