use std::sync::{Arc, Mutex as StdMutex};

use crate::index::error::{dimension_error, IndexResult};
use crate::notes::Note;

/// In-memory flat vector index with squared-L2 distance and a
/// position-to-note-id mapping. Removal compacts the backing storage, which
/// keeps positions and identifiers aligned after deletions.
#[derive(Clone)]
pub struct VectorIndex {
    inner: Arc<StdMutex<VectorIndexInner>>,
}

struct VectorIndexInner {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    ids: Vec<String>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: Arc::new(StdMutex::new(VectorIndexInner {
                dimension,
                vectors: Vec::new(),
                ids: Vec::new(),
            })),
        }
    }

    pub fn dimension(&self) -> usize {
        self.inner.lock().unwrap().dimension
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, note_id: &str) -> bool {
        self.inner.lock().unwrap().ids.iter().any(|id| id == note_id)
    }

    /// Bulk-loads the stored embeddings of the given notes, typically at
    /// startup. Notes without an embedding are skipped; an embedding whose
    /// dimension does not match the index (a provider change between runs)
    /// is logged and skipped rather than poisoning the index. Returns how
    /// many vectors were loaded.
    pub fn load(&self, notes: &[Note]) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let mut loaded = 0;

        for note in notes {
            let Some(embedding) = &note.embedding else {
                continue;
            };
            if embedding.len() != inner.dimension {
                log::warn!(
                    "stored embedding for {} has dimension {}, expected {}; skipping",
                    note.uuid,
                    embedding.len(),
                    inner.dimension
                );
                continue;
            }
            inner.vectors.push(embedding.clone());
            inner.ids.push(note.uuid.clone());
            loaded += 1;
        }
        loaded
    }

    pub fn add(&self, note_id: impl Into<String>, vector: Vec<f32>) -> IndexResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if vector.len() != inner.dimension {
            return Err(dimension_error(format!(
                "expected a {}-dimensional vector, got {}",
                inner.dimension,
                vector.len()
            )));
        }
        inner.vectors.push(vector);
        inner.ids.push(note_id.into());
        Ok(())
    }

    /// Removes any existing entry for the note and inserts the new vector.
    pub fn update(&self, note_id: &str, vector: Vec<f32>) -> IndexResult<()> {
        self.remove(note_id);
        self.add(note_id, vector)
    }

    /// Removes the entry for `note_id`, compacting the index. Returns false
    /// when the note was not indexed.
    pub fn remove(&self, note_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.ids.iter().position(|id| id == note_id) {
            Some(position) => {
                inner.ids.remove(position);
                inner.vectors.remove(position);
                true
            }
            None => false,
        }
    }

    /// The `k` nearest neighbours of `query` by squared L2 distance,
    /// closest first.
    pub fn knn(&self, query: &[f32], k: usize) -> IndexResult<Vec<(String, f32)>> {
        let inner = self.inner.lock().unwrap();
        if query.len() != inner.dimension {
            return Err(dimension_error(format!(
                "expected a {}-dimensional query, got {}",
                inner.dimension,
                query.len()
            )));
        }

        let mut scored: Vec<(String, f32)> = inner
            .ids
            .iter()
            .zip(&inner.vectors)
            .map(|(id, vector)| (id.clone(), squared_l2(query, vector)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.vectors.clear();
        inner.ids.clear();
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
