#![doc = include_str!("README.md")]
mod error;
mod manager;

pub use error::{apply_error, internal_error, SyncError, SyncErrorCode, SyncResult};
pub use manager::{SyncManager, DEFAULT_BATCH_SIZE};
