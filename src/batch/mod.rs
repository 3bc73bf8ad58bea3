//! Adaptive batch execution

pub mod error_handling;
pub mod executor;
mod pool;
pub mod types;

pub use error_handling::{FailureKind, ItemFailure};
pub use executor::*;
pub use types::*;
