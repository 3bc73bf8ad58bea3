//! Adaptive batch executor
//!
//! Runs a side-effecting action once per item and returns only when every
//! invocation has finished:
//! - Small batches run sequentially, in order, on the calling thread
//! - Large batches fan out over a bounded pool created for the call
//! - Failures are collected per item in both modes, never dropped
//! - The wait can be interrupted through a cancellation token

use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::batch::error_handling::{invoke, OutcomeTally};
use crate::batch::pool::{outside_runtime, WorkerPool};
use crate::batch::types::*;
use crate::{BatchError, Result};

/// Executes an action over a batch, choosing sequential or pooled execution
/// from the batch size.
///
/// Actions must tolerate being called concurrently from worker threads, in
/// any order. The `Send + Sync + 'static` bounds on every entry point hold
/// callers to the thread-safety half of that contract; any locking around
/// shared effects is the action's responsibility.
///
/// Entry points block the calling thread. They may be called from async
/// code: on a multi-thread runtime a parallel batch runs through
/// `block_in_place`, on a current-thread runtime its pool is driven from a
/// helper thread. Either way the calling task waits for the whole batch.
///
/// Items and actions are moved to worker threads in parallel mode, so every
/// entry point requires `T: Send + 'static` and an owned action, even for
/// batches that end up running sequentially. Share borrowed data through an
/// `Arc` instead:
///
/// ```compile_fail
/// use adaptive_batch::BatchExecutor;
///
/// let rows = vec![String::from("a"), String::from("b")];
/// let borrowed: Vec<&String> = rows.iter().collect();
/// BatchExecutor::new().execute(borrowed, |row| drop(row)).unwrap();
/// ```
///
/// ```
/// use adaptive_batch::BatchExecutor;
/// use std::sync::Arc;
///
/// let rows: Vec<Arc<String>> = vec![Arc::new("a".into()), Arc::new("b".into())];
/// let count = BatchExecutor::new().execute(rows.clone(), |row| drop(row)).unwrap();
/// assert_eq!(count, rows.len());
/// ```
pub struct BatchExecutor {
    config: BatchConfig,
    cancellation: CancellationToken,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl BatchExecutor {
    /// Create a new batch executor with default settings
    pub fn new() -> Self {
        Self::with_config(BatchConfig::default())
    }

    /// Create an executor from an existing configuration
    pub fn with_config(config: BatchConfig) -> Self {
        Self {
            config,
            cancellation: CancellationToken::new(),
            progress_callback: None,
        }
    }

    /// Set the largest batch size that still runs sequentially
    pub fn with_multi_thread_limit(mut self, limit: usize) -> Self {
        self.config.multi_thread_limit = limit;
        self
    }

    /// Set the pool size multiplier applied to the logical CPU count
    pub fn with_parallelism_multiplier(mut self, multiplier: usize) -> Self {
        self.config.parallelism_multiplier = multiplier.max(1);
        self
    }

    /// Use a fixed pool size instead of the CPU-based one
    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.config.worker_threads = Some(workers.max(1));
        self
    }

    /// Set how the rest of a batch is handled after a failure
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Set the grace period for in-flight actions when a pool shuts down
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Set the name given to worker threads
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Interrupt waits when `token` is cancelled
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Set progress callback
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Current configuration
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Token that interrupts this executor's waits when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Mode a batch of `len` items would run in
    pub fn dispatch_mode(&self, len: usize) -> DispatchMode {
        self.config.dispatch_mode(len)
    }

    /// Pool size a parallel call would use on this host right now
    pub fn worker_count(&self) -> usize {
        self.config.worker_count()
    }

    /// Run `action` once per item and return the number of items.
    ///
    /// A panicking action is reported as a failure of that item through
    /// [`BatchError::ItemsFailed`]; the remaining items still run unless
    /// [`FailurePolicy::StopOnFirstError`] is set.
    pub fn execute<T, F>(&self, items: Vec<T>, action: F) -> Result<usize>
    where
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.try_execute(items, move |item| {
            action(item);
            Ok::<(), Infallible>(())
        })
    }

    /// Run a fallible `action` once per item and return the number of items
    /// when all of them succeeded.
    pub fn try_execute<T, F, E>(&self, items: Vec<T>, action: F) -> Result<usize>
    where
        T: Send + 'static,
        F: Fn(T) -> std::result::Result<(), E> + Send + Sync + 'static,
        E: Display + 'static,
    {
        self.execute_with_report(items, action)?.into_result()
    }

    /// Run a fallible `action` once per item and report every outcome.
    ///
    /// Only interruption and pool startup failures are returned as errors;
    /// item failures are listed in the report.
    #[instrument(skip(self, items, action), fields(item_count = items.len()))]
    pub fn execute_with_report<T, F, E>(&self, items: Vec<T>, action: F) -> Result<BatchReport>
    where
        T: Send + 'static,
        F: Fn(T) -> std::result::Result<(), E> + Send + Sync + 'static,
        E: Display + 'static,
    {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let batch_start = Instant::now();
        let total = items.len();
        let mode = self.dispatch_mode(total);

        info!(
            batch_id = %batch_id,
            total_items = total,
            mode = ?mode,
            multi_thread_limit = self.config.multi_thread_limit,
            "Starting batch execution"
        );

        let (tally, interrupted, workers) = match mode {
            DispatchMode::Sequential => {
                let (tally, interrupted) = self.run_sequential(items, &action);
                (tally, interrupted, None)
            }
            DispatchMode::Parallel => {
                let (run, workers) = outside_runtime(|| -> Result<_> {
                    let pool = WorkerPool::start(&self.config)?;
                    let workers = pool.workers();
                    let run = pool.run(
                        items,
                        Arc::new(action),
                        &self.cancellation,
                        self.config.failure_policy,
                        self.progress_callback.as_deref(),
                    );
                    Ok((run, workers))
                })?;
                (run.tally, run.interrupted, Some(workers))
            }
        };

        if interrupted {
            warn!(
                batch_id = %batch_id,
                completed = tally.completed,
                total_items = total,
                "Batch interrupted while waiting for completion"
            );
            return Err(BatchError::Interrupted {
                completed: tally.completed,
                total,
            });
        }

        let completed = tally.completed;
        let skipped = tally.skipped;
        let failures = tally.into_sorted_failures();
        let duration = batch_start.elapsed();

        info!(
            batch_id = %batch_id,
            total_items = total,
            completed = completed,
            failed = failures.len(),
            skipped = skipped,
            batch_duration_ms = duration.as_millis(),
            "Batch execution completed"
        );

        if let Some(first) = failures.first() {
            warn!(
                batch_id = %batch_id,
                failed = failures.len(),
                first_failure = %first,
                "Batch finished with failed items"
            );
        }

        Ok(BatchReport {
            batch_id,
            mode,
            workers,
            total,
            completed,
            skipped,
            failures,
            started_at,
            duration,
        })
    }

    /// Invoke the action in input order on the calling thread
    fn run_sequential<T, F, E>(&self, items: Vec<T>, action: &F) -> (OutcomeTally, bool)
    where
        F: Fn(T) -> std::result::Result<(), E>,
        E: Display,
    {
        let total = items.len();
        let mut tally = OutcomeTally::default();

        for (index, item) in items.into_iter().enumerate() {
            if self.cancellation.is_cancelled() {
                return (tally, true);
            }

            let outcome = invoke(action, index, item);
            let stop = outcome.is_failure()
                && self.config.failure_policy == FailurePolicy::StopOnFirstError;
            tally.record(outcome);
            self.report_progress(tally.settled(), total);

            if stop {
                tally.skipped += total - tally.settled();
                debug!(index = index, skipped = tally.skipped, "Stopping after first failure");
                break;
            }
        }

        (tally, false)
    }

    fn report_progress(&self, settled: usize, total: usize) {
        if let Some(ref callback) = self.progress_callback {
            callback(settled, total);
        }
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new()
    }
}
