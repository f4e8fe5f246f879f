use std::collections::HashMap;
use std::sync::Arc;

use crate::index::{count_tokens, tokenize, EmbeddingProvider, IndexResult, LexicalIndex, TokenIndex, VectorIndex};
use crate::notes::NotesRepository;

pub const BM25_K1: f64 = 1.5;
pub const BM25_B: f64 = 0.75;
pub const SEMANTIC_NEIGHBOURS: usize = 100;

/// Hybrid (lexical + semantic) search over the derived indexes.
///
/// The engine never writes the notes table; it maintains the token index on
/// behalf of its callers and scores queries against the token, full-text and
/// vector indexes. Index mutations always read the post-image of the note
/// first, so the indexes can only describe what the repository holds.
#[derive(Clone)]
pub struct SearchEngine {
    notes: NotesRepository,
    tokens: TokenIndex,
    lexical: LexicalIndex,
    vectors: VectorIndex,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SearchEngine {
    pub fn new(
        notes: NotesRepository,
        tokens: TokenIndex,
        lexical: LexicalIndex,
        vectors: VectorIndex,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            notes,
            tokens,
            lexical,
            vectors,
            embedder,
        }
    }

    /// (Re)builds the token rows for a note from its current state.
    pub async fn index_note(&self, note_id: &str) -> IndexResult<()> {
        let Some(note) = self.notes.get(note_id).await? else {
            log::error!("cannot index note {}: it does not exist", note_id);
            return Ok(());
        };

        let tokens = tokenize(&note.search_text());
        let counts = count_tokens(&tokens);
        self.tokens.replace_note_tokens(note_id, counts).await?;
        Ok(())
    }

    pub async fn update_index(&self, note_id: &str) -> IndexResult<()> {
        self.index_note(note_id).await
    }

    pub async fn remove_from_index(&self, note_id: &str) -> IndexResult<()> {
        self.tokens.remove_note(note_id).await?;
        Ok(())
    }

    /// Plain term-frequency scoring: notes sharing more query tokens first.
    pub async fn search(&self, query: &str) -> IndexResult<Vec<(String, u32)>> {
        let mut scores: HashMap<String, u32> = HashMap::new();

        for token in tokenize(query) {
            for (note_id, count) in self.tokens.notes_containing(&token).await? {
                *scores.entry(note_id).or_insert(0) += count;
            }
        }

        let mut results: Vec<(String, u32)> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(results)
    }

    /// BM25 over the full-text candidates for each query token.
    pub async fn lexical_search(&self, query: &str) -> IndexResult<Vec<(String, f64)>> {
        let total_notes = self.notes.count_non_deleted().await? as f64;
        let Some(average_length) = self.tokens.average_document_length().await? else {
            return Ok(Vec::new());
        };

        let mut scores: HashMap<String, f64> = HashMap::new();

        for token in tokenize(query) {
            // Quote the token so FTS5 treats it as a term, not syntax.
            let candidates = self.lexical.search(&format!("\"{}\"", token)).await?;
            let containing = candidates.len() as f64;
            let idf = ((total_notes - containing + 0.5) / (containing + 0.5)).ln();

            for note_id in candidates {
                let Some(note) = self.notes.get(&note_id).await? else {
                    continue;
                };
                let document = format!(
                    "{} {} {}",
                    note.title,
                    note.contents,
                    note.tags.split(',').collect::<Vec<_>>().join(" ")
                );
                let document_length = document.split_whitespace().count() as f64;

                // FTS5 matches case-insensitively while token rows are
                // case-sensitive, so a candidate may lack this exact term.
                let Some(count) = self.tokens.term_frequency(&note_id, &token).await? else {
                    continue;
                };
                let count = count as f64;

                let tf = count
                    / (count + BM25_K1 * (1.0 - BM25_B + BM25_B * (document_length / average_length)));
                *scores.entry(note_id).or_insert(0.0) += tf * idf;
            }
        }

        let mut results: Vec<(String, f64)> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(results)
    }

    /// Embeds the query and returns the nearest notes, closest first.
    pub async fn semantic_search(&self, query: &str, k: usize) -> IndexResult<Vec<(String, f32)>> {
        let embedding = self.embedder.embed(query).await?;
        self.vectors.knn(&embedding, k)
    }

    /// Fuses BM25 and vector scores with min-max normalisation and equal
    /// weights. Returns `None` when the store holds no live notes.
    pub async fn hybrid_search(&self, query: &str) -> IndexResult<Option<Vec<(String, f64)>>> {
        if self.notes.count_non_deleted().await? == 0 {
            return Ok(None);
        }

        let lexical = self.lexical_search(query).await?;
        let semantic = self.semantic_search(query, SEMANTIC_NEIGHBOURS).await?;

        let mut combined: HashMap<String, f64> = HashMap::new();
        for (note_id, score) in normalise(&lexical) {
            *combined.entry(note_id).or_insert(0.0) += 0.5 * score;
        }
        // Distances become similarities before fusing: nearest -> 1.0.
        let similarities: Vec<(String, f64)> = normalise(
            &semantic
                .iter()
                .map(|(id, distance)| (id.clone(), *distance as f64))
                .collect::<Vec<_>>(),
        )
        .into_iter()
        .map(|(id, score)| (id, 1.0 - score))
        .collect();
        for (note_id, score) in similarities {
            *combined.entry(note_id).or_insert(0.0) += 0.5 * score;
        }

        let mut results: Vec<(String, f64)> = combined.into_iter().collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(Some(results))
    }
}

fn normalise(scores: &[(String, f64)]) -> Vec<(String, f64)> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = scores.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    scores
        .iter()
        .map(|(id, score)| {
            let value = if range > 0.0 { (score - min) / range } else { 1.0 };
            (id.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{HashEmbedding, IndexError};
    use crate::persistence::PersistenceWorker;
    use async_trait::async_trait;

    /// Embeds each known phrase to a fixed axis so distances are exact.
    struct FixtureEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixtureEmbedder {
        fn dimension(&self) -> usize {
            3
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
            let vector = if text.contains("cooking") {
                vec![1.0, 0.0, 0.0]
            } else if text.contains("gardening") {
                vec![0.0, 1.0, 0.0]
            } else {
                vec![0.0, 0.0, 1.0]
            };
            Ok(vector)
        }
    }

    async fn engine_with(
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> (SearchEngine, NotesRepository, VectorIndex, PersistenceWorker) {
        let worker = PersistenceWorker::open_in_memory().await.unwrap();
        let notes = NotesRepository::new(worker.clone());
        notes.initialize().await.unwrap();
        let tokens = TokenIndex::new(worker.clone());
        tokens.initialize().await.unwrap();
        let lexical = LexicalIndex::new(worker.clone());
        lexical.initialize().await.unwrap();
        let vectors = VectorIndex::new(embedder.dimension());

        let engine = SearchEngine::new(
            notes.clone(),
            tokens,
            lexical.clone(),
            vectors.clone(),
            embedder,
        );
        (engine, notes, vectors, worker)
    }

    async fn seed_note(
        engine: &SearchEngine,
        notes: &NotesRepository,
        vectors: &VectorIndex,
        lexical_text: (&str, &str, &str),
        embedding_text: &str,
    ) -> String {
        let (title, contents, tags) = lexical_text;
        let uuid = notes.create(title, contents, tags, None).await.unwrap();
        engine.index_note(&uuid).await.unwrap();
        engine
            .lexical
            .index_note(&uuid, title, contents)
            .await
            .unwrap();
        let embedding = engine.embedder.embed(embedding_text).await.unwrap();
        vectors.add(&uuid, embedding).unwrap();
        uuid
    }

    #[tokio::test]
    async fn term_frequency_search_ranks_by_shared_tokens() {
        let (engine, notes, vectors, worker) = engine_with(Arc::new(FixtureEmbedder)).await;
        let pasta = seed_note(
            &engine,
            &notes,
            &vectors,
            ("pasta pasta recipes", "cooking cooking cooking", "food"),
            "cooking",
        )
        .await;
        let roses = seed_note(
            &engine,
            &notes,
            &vectors,
            ("roses", "gardening with cooking scraps", "garden"),
            "gardening",
        )
        .await;

        let results = engine.search("cooking").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, pasta);
        assert_eq!(results[1].0, roses);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn bm25_prefers_the_note_dominated_by_the_term() {
        let (engine, notes, vectors, worker) = engine_with(Arc::new(FixtureEmbedder)).await;
        let focused = seed_note(
            &engine,
            &notes,
            &vectors,
            ("espresso", "espresso espresso espresso", "coffee"),
            "cooking",
        )
        .await;
        let diluted = seed_note(
            &engine,
            &notes,
            &vectors,
            (
                "kitchen inventory",
                "espresso machine toaster kettle blender mixer scales jars",
                "home",
            ),
            "other",
        )
        .await;
        // Background corpus keeps the term rare enough for a positive idf.
        for body in ["walking routes", "reading list", "travel plans"] {
            seed_note(&engine, &notes, &vectors, ("misc", body, "misc"), "other").await;
        }

        let results = engine.lexical_search("espresso").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, focused);
        assert_eq!(results[1].0, diluted);
        assert!(results[0].1 > results[1].1);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn lexical_search_on_empty_index_is_empty() {
        let (engine, _notes, _vectors, worker) = engine_with(Arc::new(FixtureEmbedder)).await;
        assert!(engine.lexical_search("anything").await.unwrap().is_empty());
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn semantic_search_returns_nearest_first() {
        let (engine, notes, vectors, worker) = engine_with(Arc::new(FixtureEmbedder)).await;
        let cooking = seed_note(
            &engine,
            &notes,
            &vectors,
            ("sauces", "mother sauces", "food"),
            "cooking",
        )
        .await;
        let garden = seed_note(
            &engine,
            &notes,
            &vectors,
            ("beds", "raised beds", "garden"),
            "gardening",
        )
        .await;

        let results = engine.semantic_search("cooking question", 10).await.unwrap();
        assert_eq!(results[0].0, cooking);
        assert_eq!(results[0].1, 0.0);
        assert_eq!(results[1].0, garden);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn hybrid_search_is_none_on_an_empty_store() {
        let (engine, _notes, _vectors, worker) = engine_with(Arc::new(FixtureEmbedder)).await;
        assert!(engine.hybrid_search("anything").await.unwrap().is_none());
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn hybrid_search_fuses_both_signals() {
        let (engine, notes, vectors, worker) = engine_with(Arc::new(FixtureEmbedder)).await;
        let both = seed_note(
            &engine,
            &notes,
            &vectors,
            ("cooking basics", "cooking stocks and sauces", "food"),
            "cooking",
        )
        .await;
        let lexical_only = seed_note(
            &engine,
            &notes,
            &vectors,
            ("cooking gear", "pans and knives", "gear"),
            "gardening",
        )
        .await;
        for body in ["walking routes", "reading list", "travel plans"] {
            seed_note(&engine, &notes, &vectors, ("misc", body, "misc"), "other").await;
        }

        let results = engine.hybrid_search("cooking").await.unwrap().unwrap();
        assert_eq!(results[0].0, both);
        assert!(results.iter().any(|(id, _)| id == &lexical_only));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn default_embedder_composes_with_the_engine() {
        let embedder = Arc::new(HashEmbedding::new(32));
        let (engine, notes, vectors, worker) = engine_with(embedder).await;
        let uuid = notes
            .create("title", "unique contents here", "tag", None)
            .await
            .unwrap();
        engine.index_note(&uuid).await.unwrap();
        let embedding = engine.embedder.embed("title unique contents here tag").await.unwrap();
        vectors.add(&uuid, embedding).unwrap();

        let hits = engine.semantic_search("unique contents", 5).await.unwrap();
        assert_eq!(hits[0].0, uuid);
        worker.shutdown().await;
    }
}
