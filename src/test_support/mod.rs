//! Test utilities shared across crate-level unit tests.

pub mod device;

pub use device::{eventually, TestDevice};
