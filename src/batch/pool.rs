//! Worker pool scoped to a single batch call.
//!
//! The pool is a current-thread Tokio runtime owned by one call. The calling
//! thread drives the runtime and waits for completions, while actions run on
//! the runtime's blocking threads, capped at the pool size. The runtime is
//! shut down before [`WorkerPool::run`] returns, on every path.
//!
//! A runtime cannot be driven from a thread that is already driving one, so
//! [`outside_runtime`] moves the whole pool lifecycle off such threads.

use std::fmt::Display;
use std::panic;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::batch::error_handling::{invoke, ItemOutcome, OutcomeTally};
use crate::batch::types::{BatchConfig, FailurePolicy, ProgressCallback};
use crate::Result;

/// Bounded pool of worker threads for one batch
pub(crate) struct WorkerPool {
    runtime: Runtime,
    workers: usize,
    shutdown_timeout: Duration,
}

/// What the pool observed while running a batch
pub(crate) struct PoolRun {
    pub(crate) tally: OutcomeTally,
    pub(crate) interrupted: bool,
}

impl WorkerPool {
    /// Start a fresh pool sized from `config`
    pub(crate) fn start(config: &BatchConfig) -> Result<Self> {
        let workers = config.worker_count();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .max_blocking_threads(workers)
            .thread_name(config.thread_name.clone())
            .build()?;

        debug!(workers = workers, thread_name = %config.thread_name, "Worker pool started");

        Ok(Self {
            runtime,
            workers,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub(crate) fn workers(&self) -> usize {
        self.workers
    }

    /// Submit one task per item and block until all of them have settled
    /// or `cancel` fires.
    ///
    /// On cancellation, queued tasks are aborted before they invoke the
    /// action and in-flight actions get `shutdown_timeout` to finish before
    /// the pool detaches them.
    pub(crate) fn run<T, F, E>(
        self,
        items: Vec<T>,
        action: Arc<F>,
        cancel: &CancellationToken,
        policy: FailurePolicy,
        progress: Option<&ProgressCallback>,
    ) -> PoolRun
    where
        T: Send + 'static,
        F: Fn(T) -> std::result::Result<(), E> + Send + Sync + 'static,
        E: Display + 'static,
    {
        let WorkerPool {
            runtime,
            workers,
            shutdown_timeout,
        } = self;
        let total = items.len();
        // Cancelled by the caller's token or by the failure policy
        let halt = cancel.child_token();

        let run = runtime.block_on(async {
            let mut tasks = JoinSet::new();
            for (index, item) in items.into_iter().enumerate() {
                let action = Arc::clone(&action);
                let halt = halt.clone();
                tasks.spawn_blocking(move || {
                    if halt.is_cancelled() {
                        return ItemOutcome::Skipped;
                    }
                    invoke(action.as_ref(), index, item)
                });
            }
            debug!(tasks = total, workers = workers, "All tasks submitted");

            let mut tally = OutcomeTally::default();
            let interrupted = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled(), if tally.settled() < total => break true,
                    joined = tasks.join_next() => match joined {
                        None => break false,
                        Some(Ok(outcome)) => {
                            if outcome.is_failure()
                                && policy == FailurePolicy::StopOnFirstError
                                && !halt.is_cancelled()
                            {
                                debug!("First failure seen, skipping remaining tasks");
                                halt.cancel();
                            }
                            tally.record(outcome);
                            if let Some(callback) = progress {
                                callback(tally.settled(), total);
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Worker task ended without an outcome");
                            tally.record(ItemOutcome::Skipped);
                        }
                    }
                }
            };

            if interrupted {
                tasks.abort_all();
            }
            PoolRun { tally, interrupted }
        });

        runtime.shutdown_timeout(shutdown_timeout);
        debug!(workers = workers, "Worker pool shut down");
        run
    }
}

/// Run `f` where it is allowed to block on a pool of its own.
///
/// Outside any runtime `f` runs directly. On a multi-thread runtime it runs
/// through `block_in_place`, so the runtime hands this thread's other tasks
/// to its remaining workers. A current-thread runtime cannot do that, so
/// `f` runs on a helper thread and the caller blocks until it is joined.
pub(crate) fn outside_runtime<R, F>(f: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    match Handle::try_current() {
        Err(_) => f(),
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            debug!("Called from a multi-thread runtime, blocking in place");
            tokio::task::block_in_place(f)
        }
        Ok(_) => {
            debug!("Called from a current-thread runtime, driving pool from a helper thread");
            thread::scope(|scope| match scope.spawn(f).join() {
                Ok(result) => result,
                Err(payload) => panic::resume_unwind(payload),
            })
        }
    }
}
