mod engine;

pub use engine::{SearchEngine, BM25_B, BM25_K1, SEMANTIC_NEIGHBOURS};
