use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryErrorCode {
    Daemon,
    InvalidRecord,
}

impl DiscoveryErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryErrorCode::Daemon => "discovery/daemon",
            DiscoveryErrorCode::InvalidRecord => "discovery/invalid-record",
        }
    }
}

#[derive(Clone, Debug)]
pub struct DiscoveryError {
    pub code: DiscoveryErrorCode,
    message: String,
}

impl DiscoveryError {
    pub fn new(code: DiscoveryErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for DiscoveryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for DiscoveryError {}

impl From<mdns_sd::Error> for DiscoveryError {
    fn from(err: mdns_sd::Error) -> Self {
        daemon_error(err.to_string())
    }
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

pub fn daemon_error(message: impl Into<String>) -> DiscoveryError {
    DiscoveryError::new(DiscoveryErrorCode::Daemon, message)
}

pub fn invalid_record(message: impl Into<String>) -> DiscoveryError {
    DiscoveryError::new(DiscoveryErrorCode::InvalidRecord, message)
}
