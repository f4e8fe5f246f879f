mod log;
mod types;

pub use log::ChangeLog;
pub use types::{Operation, OperationKind};
