#![doc = include_str!("README.md")]
mod error;
mod frame;
mod session;
#[allow(clippy::module_inception)]
mod transport;

pub use error::{
    connect_error, crypto_error, handshake_error, io_error, unknown_peer, TransportError,
    TransportErrorCode, TransportResult,
};
pub use frame::{read_frame, read_handshake, write_frame, write_handshake, write_terminator, Frame};
pub use session::{decrypt_frame, derive_session_key, encrypt_frame, SESSION_CONTEXT};
pub use transport::{
    InboundHandler, RegisteredPeer, Transport, CONNECT_TIMEOUT, FRAME_READ_TIMEOUT,
    HANDSHAKE_TIMEOUT,
};
