#![doc = include_str!("README.md")]
mod embedding;
mod error;
mod lexical;
mod tokenizer;
mod tokens;
mod vector;

pub use embedding::{EmbeddingProvider, HashEmbedding, MAX_EMBED_CHARS};
pub use error::{dimension_error, embedding_error, internal_error, IndexError, IndexErrorCode, IndexResult};
pub use lexical::LexicalIndex;
pub use tokenizer::{count_tokens, tokenize};
pub use tokens::TokenIndex;
pub use vector::VectorIndex;
