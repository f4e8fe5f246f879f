use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};

use crate::persistence::{PersistenceResult, PersistenceWorker};

/// Per-note term frequencies backing BM25 scoring: token rows, total counts
/// and the average document length over all indexed notes.
#[derive(Clone)]
pub struct TokenIndex {
    worker: PersistenceWorker,
}

impl TokenIndex {
    pub fn new(worker: PersistenceWorker) -> Self {
        Self { worker }
    }

    pub async fn initialize(&self) -> PersistenceResult<()> {
        self.worker
            .submit(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS tokens(
                        id INTEGER PRIMARY KEY,
                        note_id TEXT,
                        token TEXT,
                        count INTEGER,
                        FOREIGN KEY (note_id) REFERENCES notes (uuid))",
                    [],
                )?;
                Ok(())
            })
            .await
    }

    /// Replaces every token row for a note with the given frequencies.
    pub async fn replace_note_tokens(
        &self,
        note_id: &str,
        counts: HashMap<String, u32>,
    ) -> PersistenceResult<()> {
        let note_id = note_id.to_string();
        self.worker
            .submit(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM tokens WHERE note_id = ?1", [&note_id])?;
                {
                    let mut stmt = tx
                        .prepare("INSERT INTO tokens (note_id, token, count) VALUES (?1, ?2, ?3)")?;
                    for (token, count) in &counts {
                        stmt.execute(params![note_id, token, count])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    pub async fn remove_note(&self, note_id: &str) -> PersistenceResult<()> {
        let note_id = note_id.to_string();
        self.worker
            .submit(move |conn| {
                conn.execute("DELETE FROM tokens WHERE note_id = ?1", [&note_id])?;
                Ok(())
            })
            .await
    }

    pub async fn tokens_for_note(&self, note_id: &str) -> PersistenceResult<Vec<(String, u32)>> {
        let note_id = note_id.to_string();
        self.worker
            .submit(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT token, count FROM tokens WHERE note_id = ?1")?;
                let rows = stmt
                    .query_map([&note_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Every note containing `token`, with its in-document frequency.
    pub async fn notes_containing(&self, token: &str) -> PersistenceResult<Vec<(String, u32)>> {
        let token = token.to_string();
        self.worker
            .submit(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT note_id, count FROM tokens WHERE token = ?1")?;
                let rows = stmt
                    .query_map([&token], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn term_frequency(
        &self,
        note_id: &str,
        token: &str,
    ) -> PersistenceResult<Option<u32>> {
        let note_id = note_id.to_string();
        let token = token.to_string();
        self.worker
            .submit(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT count FROM tokens WHERE note_id = ?1 AND token = ?2",
                        params![note_id, token],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await
    }

    /// Mean token count per indexed note; `None` while the index is empty.
    pub async fn average_document_length(&self) -> PersistenceResult<Option<f64>> {
        self.worker
            .submit(|conn| {
                Ok(conn.query_row(
                    "SELECT AVG(doc_len) FROM
                        (SELECT SUM(count) AS doc_len FROM tokens GROUP BY note_id)",
                    [],
                    |row| row.get::<_, Option<f64>>(0),
                )?)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn index() -> (TokenIndex, PersistenceWorker) {
        let worker = PersistenceWorker::open_in_memory().await.unwrap();
        let index = TokenIndex::new(worker.clone());
        worker
            .submit(|conn| {
                conn.execute("CREATE TABLE IF NOT EXISTS notes(uuid TEXT PRIMARY KEY)", [])?;
                Ok(())
            })
            .await
            .unwrap();
        index.initialize().await.unwrap();
        (index, worker)
    }

    async fn seed_note(worker: &PersistenceWorker, note_id: &str) {
        let note_id = note_id.to_string();
        worker
            .submit(move |conn| {
                conn.execute("INSERT INTO notes (uuid) VALUES (?1)", [&note_id])?;
                Ok(())
            })
            .await
            .unwrap();
    }

    fn counts(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(t, c)| (t.to_string(), *c)).collect()
    }

    #[tokio::test]
    async fn replace_note_tokens_is_a_full_swap() {
        let (index, worker) = index().await;
        seed_note(&worker, "n1").await;

        index
            .replace_note_tokens("n1", counts(&[("alpha", 2), ("beta", 1)]))
            .await
            .unwrap();
        index
            .replace_note_tokens("n1", counts(&[("gamma", 3)]))
            .await
            .unwrap();

        let mut tokens = index.tokens_for_note("n1").await.unwrap();
        tokens.sort();
        assert_eq!(tokens, vec![("gamma".to_string(), 3)]);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn lookups_and_average_length() {
        let (index, worker) = index().await;
        assert_eq!(index.average_document_length().await.unwrap(), None);
        seed_note(&worker, "n1").await;
        seed_note(&worker, "n2").await;

        index
            .replace_note_tokens("n1", counts(&[("alpha", 2), ("beta", 2)]))
            .await
            .unwrap();
        index
            .replace_note_tokens("n2", counts(&[("alpha", 1), ("gamma", 1)]))
            .await
            .unwrap();

        let mut hits = index.notes_containing("alpha").await.unwrap();
        hits.sort();
        assert_eq!(hits, vec![("n1".to_string(), 2), ("n2".to_string(), 1)]);

        assert_eq!(index.term_frequency("n1", "beta").await.unwrap(), Some(2));
        assert_eq!(index.term_frequency("n2", "beta").await.unwrap(), None);

        // (2 + 2) and (1 + 1) tokens -> average 3.
        assert_eq!(index.average_document_length().await.unwrap(), Some(3.0));

        index.remove_note("n1").await.unwrap();
        assert!(index.tokens_for_note("n1").await.unwrap().is_empty());
        worker.shutdown().await;
    }
}

