//! Configuration, dispatch policy and batch reports

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::batch::error_handling::ItemFailure;
use crate::{BatchError, Result};

/// Batches larger than this are dispatched to a worker pool
pub const DEFAULT_MULTI_THREAD_LIMIT: usize = 2000;

/// Worker pool size as a multiple of the host's logical CPU count
pub const DEFAULT_PARALLELISM_MULTIPLIER: usize = 3;

/// Grace period given to in-flight actions when a pool shuts down
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Name prefix for worker pool threads
pub const DEFAULT_THREAD_NAME: &str = "batch-worker";

/// How a single batch call is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchMode {
    /// In input order on the calling thread
    Sequential,
    /// On a bounded worker pool created for this call
    Parallel,
}

/// What to do with the rest of a batch once an item fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Run every item and report all failures at the end
    #[default]
    ContinueOnError,
    /// Stop dispatching new items after the first failure
    StopOnFirstError,
}

/// Batch execution configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Largest batch that still runs sequentially
    pub multi_thread_limit: usize,
    /// Pool size multiplier applied to the logical CPU count
    pub parallelism_multiplier: usize,
    /// Fixed pool size, overrides the multiplier when set
    pub worker_threads: Option<usize>,
    /// Handling of failed items
    pub failure_policy: FailurePolicy,
    /// How long a pool waits for in-flight actions when shutting down
    pub shutdown_timeout: Duration,
    /// Name given to worker threads
    pub thread_name: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            multi_thread_limit: DEFAULT_MULTI_THREAD_LIMIT,
            parallelism_multiplier: DEFAULT_PARALLELISM_MULTIPLIER,
            worker_threads: None,
            failure_policy: FailurePolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl BatchConfig {
    /// Load a configuration from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can produce a working pool
    pub fn validate(&self) -> Result<()> {
        if self.parallelism_multiplier == 0 {
            return Err(BatchError::Config(
                "parallelism_multiplier must be at least 1".to_string(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(BatchError::Config(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(BatchError::Config("thread_name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Pick the dispatch mode for a batch of `len` items.
    ///
    /// The comparison is strict: a batch of exactly `multi_thread_limit`
    /// items still runs sequentially.
    pub fn dispatch_mode(&self, len: usize) -> DispatchMode {
        if len <= self.multi_thread_limit {
            DispatchMode::Sequential
        } else {
            DispatchMode::Parallel
        }
    }

    /// Number of worker threads a parallel call would start right now
    pub fn worker_count(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(|| self.parallelism_multiplier.saturating_mul(num_cpus::get()))
            .max(1)
    }
}

/// Callback for progress updates: `(completed, total)`
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Summary of one batch call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Identifier used in log output for this call
    pub batch_id: Uuid,
    /// Mode the batch ran in
    pub mode: DispatchMode,
    /// Pool size, `None` when no pool was created
    pub workers: Option<usize>,
    /// Number of items submitted
    pub total: usize,
    /// Number of items whose action finished, successfully or not
    pub completed: usize,
    /// Number of items whose action was never invoked
    pub skipped: usize,
    /// Failed items, ordered by index
    pub failures: Vec<ItemFailure>,
    /// When the call started
    pub started_at: DateTime<Utc>,
    /// Wall time of the call
    pub duration: Duration,
}

impl BatchReport {
    /// Items whose action returned successfully
    pub fn succeeded(&self) -> usize {
        self.completed - self.failures.len()
    }

    /// True when every item ran and none failed
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.skipped == 0
    }

    /// Collapse the report into the item count, or an aggregated error
    pub fn into_result(self) -> Result<usize> {
        if self.failures.is_empty() {
            Ok(self.total)
        } else {
            Err(BatchError::ItemsFailed {
                total: self.total,
                failures: self.failures,
            })
        }
    }
}
