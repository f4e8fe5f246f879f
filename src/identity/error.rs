use std::fmt::{Display, Formatter};

use crate::persistence::PersistenceError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityErrorCode {
    InvalidKey,
    Internal,
}

impl IdentityErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityErrorCode::InvalidKey => "identity/invalid-key",
            IdentityErrorCode::Internal => "identity/internal",
        }
    }
}

#[derive(Clone, Debug)]
pub struct IdentityError {
    pub code: IdentityErrorCode,
    message: String,
}

impl IdentityError {
    pub fn new(code: IdentityErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for IdentityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for IdentityError {}

impl From<PersistenceError> for IdentityError {
    fn from(err: PersistenceError) -> Self {
        internal_error(err.to_string())
    }
}

pub type IdentityResult<T> = Result<T, IdentityError>;

pub fn invalid_key(message: impl Into<String>) -> IdentityError {
    IdentityError::new(IdentityErrorCode::InvalidKey, message)
}

pub fn internal_error(message: impl Into<String>) -> IdentityError {
    IdentityError::new(IdentityErrorCode::Internal, message)
}
