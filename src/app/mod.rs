mod api;
mod error;

pub use api::{Noted, NotedConfig};
pub use error::{internal_error, AppError, AppErrorCode, AppResult};
