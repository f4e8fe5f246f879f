use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportErrorCode {
    UnknownPeer,
    Connect,
    Handshake,
    Crypto,
    Io,
}

impl TransportErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorCode::UnknownPeer => "transport/unknown-peer",
            TransportErrorCode::Connect => "transport/connect",
            TransportErrorCode::Handshake => "transport/handshake",
            TransportErrorCode::Crypto => "transport/crypto",
            TransportErrorCode::Io => "transport/io",
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransportError {
    pub code: TransportErrorCode,
    message: String,
}

impl TransportError {
    pub fn new(code: TransportErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        io_error(err.to_string())
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

pub fn unknown_peer(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorCode::UnknownPeer, message)
}

pub fn connect_error(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorCode::Connect, message)
}

pub fn handshake_error(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorCode::Handshake, message)
}

pub fn crypto_error(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorCode::Crypto, message)
}

pub fn io_error(message: impl Into<String>) -> TransportError {
    TransportError::new(TransportErrorCode::Io, message)
}
