use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistenceErrorCode {
    Closed,
    Database,
    Internal,
}

impl PersistenceErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceErrorCode::Closed => "persistence/closed",
            PersistenceErrorCode::Database => "persistence/database",
            PersistenceErrorCode::Internal => "persistence/internal",
        }
    }
}

#[derive(Clone, Debug)]
pub struct PersistenceError {
    pub code: PersistenceErrorCode,
    message: String,
}

impl PersistenceError {
    pub fn new(code: PersistenceErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for PersistenceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for PersistenceError {}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        database_error(err.to_string())
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

pub fn closed_error(message: impl Into<String>) -> PersistenceError {
    PersistenceError::new(PersistenceErrorCode::Closed, message)
}

pub fn database_error(message: impl Into<String>) -> PersistenceError {
    PersistenceError::new(PersistenceErrorCode::Database, message)
}

pub fn internal_error(message: impl Into<String>) -> PersistenceError {
    PersistenceError::new(PersistenceErrorCode::Internal, message)
}
