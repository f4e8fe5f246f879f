use std::fmt::{Display, Formatter};

use crate::index::IndexError;
use crate::persistence::PersistenceError;
use crate::transport::TransportError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncErrorCode {
    Apply,
    Storage,
    Index,
    Transport,
    Internal,
}

impl SyncErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncErrorCode::Apply => "sync/apply",
            SyncErrorCode::Storage => "sync/storage",
            SyncErrorCode::Index => "sync/index",
            SyncErrorCode::Transport => "sync/transport",
            SyncErrorCode::Internal => "sync/internal",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyncError {
    pub code: SyncErrorCode,
    message: String,
}

impl SyncError {
    pub fn new(code: SyncErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for SyncError {}

impl From<PersistenceError> for SyncError {
    fn from(err: PersistenceError) -> Self {
        SyncError::new(SyncErrorCode::Storage, err.to_string())
    }
}

impl From<IndexError> for SyncError {
    fn from(err: IndexError) -> Self {
        SyncError::new(SyncErrorCode::Index, err.to_string())
    }
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        SyncError::new(SyncErrorCode::Transport, err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

pub fn apply_error(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCode::Apply, message)
}

pub fn internal_error(message: impl Into<String>) -> SyncError {
    SyncError::new(SyncErrorCode::Internal, message)
}
