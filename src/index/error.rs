use std::fmt::{Display, Formatter};

use crate::persistence::PersistenceError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexErrorCode {
    Dimension,
    Embedding,
    Internal,
}

impl IndexErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexErrorCode::Dimension => "index/dimension-mismatch",
            IndexErrorCode::Embedding => "index/embedding",
            IndexErrorCode::Internal => "index/internal",
        }
    }
}

#[derive(Clone, Debug)]
pub struct IndexError {
    pub code: IndexErrorCode,
    message: String,
}

impl IndexError {
    pub fn new(code: IndexErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for IndexError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for IndexError {}

impl From<PersistenceError> for IndexError {
    fn from(err: PersistenceError) -> Self {
        internal_error(err.to_string())
    }
}

pub type IndexResult<T> = Result<T, IndexError>;

pub fn dimension_error(message: impl Into<String>) -> IndexError {
    IndexError::new(IndexErrorCode::Dimension, message)
}

pub fn embedding_error(message: impl Into<String>) -> IndexError {
    IndexError::new(IndexErrorCode::Embedding, message)
}

pub fn internal_error(message: impl Into<String>) -> IndexError {
    IndexError::new(IndexErrorCode::Internal, message)
}
