#![doc = include_str!("README.md")]
mod error;
mod worker;

pub use error::{closed_error, database_error, internal_error, PersistenceError, PersistenceErrorCode, PersistenceResult};
pub use worker::PersistenceWorker;
