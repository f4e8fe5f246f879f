mod error;
mod service;

pub use error::{daemon_error, invalid_record, DiscoveryError, DiscoveryErrorCode, DiscoveryResult};
pub use service::{DiscoveredPeer, Discovery, PeerEvent, SERVICE_PORT, SERVICE_TYPE};
