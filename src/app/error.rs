use std::fmt::{Display, Formatter};

use crate::discovery::DiscoveryError;
use crate::identity::IdentityError;
use crate::index::IndexError;
use crate::persistence::PersistenceError;
use crate::sync::SyncError;
use crate::transport::TransportError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppErrorCode {
    Persistence,
    Identity,
    Index,
    Discovery,
    Transport,
    Sync,
    Internal,
}

impl AppErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppErrorCode::Persistence => "app/persistence",
            AppErrorCode::Identity => "app/identity",
            AppErrorCode::Index => "app/index",
            AppErrorCode::Discovery => "app/discovery",
            AppErrorCode::Transport => "app/transport",
            AppErrorCode::Sync => "app/sync",
            AppErrorCode::Internal => "app/internal",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppError {
    pub code: AppErrorCode,
    message: String,
}

impl AppError {
    pub fn new(code: AppErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for AppError {}

impl From<PersistenceError> for AppError {
    fn from(err: PersistenceError) -> Self {
        AppError::new(AppErrorCode::Persistence, err.to_string())
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        AppError::new(AppErrorCode::Identity, err.to_string())
    }
}

impl From<IndexError> for AppError {
    fn from(err: IndexError) -> Self {
        AppError::new(AppErrorCode::Index, err.to_string())
    }
}

impl From<DiscoveryError> for AppError {
    fn from(err: DiscoveryError) -> Self {
        AppError::new(AppErrorCode::Discovery, err.to_string())
    }
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        AppError::new(AppErrorCode::Transport, err.to_string())
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        AppError::new(AppErrorCode::Sync, err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

pub fn internal_error(message: impl Into<String>) -> AppError {
    AppError::new(AppErrorCode::Internal, message)
}
