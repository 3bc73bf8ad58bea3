//! # Adaptive Batch
//!
//! Runs a side-effecting action over every item of a batch and blocks until
//! all invocations have finished. Small batches run sequentially on the
//! calling thread; batches above a size threshold fan out over a bounded
//! worker pool created for that call alone.
//!
//! ## Quick Start
//!
//! ```rust
//! use adaptive_batch::BatchExecutor;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! # fn example() -> adaptive_batch::Result<()> {
//! let written = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&written);
//!
//! let executor = BatchExecutor::new().with_multi_thread_limit(100);
//! let count = executor.execute((0..500).collect(), move |_row: u32| {
//!     counter.fetch_add(1, Ordering::Relaxed);
//! })?;
//!
//! assert_eq!(count, 500);
//! assert_eq!(written.load(Ordering::Relaxed), 500);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Key Features
//!
//! - **Threshold dispatch**: batches of up to 2000 items run in order on the
//!   calling thread, larger ones on a pool of 3 threads per logical CPU
//! - **Scoped pools**: every pool is shut down before the call returns
//! - **No silent failures**: errors and panics are collected per item
//! - **Interruptible waits**: cancel a [`tokio_util::sync::CancellationToken`]
//!   to abandon a running batch
//!
//! ## Modules
//!
//! - [`batch`]: The executor, its configuration and per-item outcomes
//! - [`utils`]: Logging setup and test helpers

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for batch operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Main error type for batch operations
#[derive(Error, Debug)]
pub enum BatchError {
    /// The caller's cancellation token fired while waiting for the batch
    #[error("Interrupted while waiting for batch completion ({completed}/{total} items finished)")]
    Interrupted {
        /// Items whose action had finished when the wait was abandoned
        completed: usize,
        /// Items submitted
        total: usize,
    },

    /// One or more actions returned an error or panicked
    #[error("{} of {} items failed", .failures.len(), .total)]
    ItemsFailed {
        /// Items submitted
        total: usize,
        /// Failed items, ordered by index
        failures: Vec<batch::ItemFailure>,
    },

    /// The worker pool could not be started
    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Batch execution module
pub mod batch;

/// Utility functions and helpers
pub mod utils;

pub use batch::{
    BatchConfig, BatchExecutor, BatchReport, DispatchMode, FailureKind, FailurePolicy,
    ItemFailure,
};
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_display() {
        let err = BatchError::Interrupted {
            completed: 12,
            total: 3000,
        };
        assert_eq!(
            err.to_string(),
            "Interrupted while waiting for batch completion (12/3000 items finished)"
        );
    }

    #[test]
    fn test_items_failed_display() {
        let err = BatchError::ItemsFailed {
            total: 5,
            failures: vec![ItemFailure {
                index: 1,
                kind: FailureKind::Error,
                message: "constraint violated".to_string(),
            }],
        };
        assert_eq!(err.to_string(), "1 of 5 items failed");
    }
}
