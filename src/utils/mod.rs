//! Utility functions for batch operations

/// Logging setup
pub mod logging {
    use tracing_subscriber::EnvFilter;

    /// Filter used when `RUST_LOG` is not set
    pub const DEFAULT_FILTER: &str = "adaptive_batch=info";

    /// Install a `tracing` subscriber that honours `RUST_LOG`.
    ///
    /// Returns `false` when a global subscriber was already installed, so
    /// tests and benches can call it freely.
    pub fn init() -> bool {
        init_with_filter(DEFAULT_FILTER)
    }

    /// Install a `tracing` subscriber, falling back to `default_filter`
    /// when `RUST_LOG` is not set
    pub fn init_with_filter(default_filter: &str) -> bool {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
            .is_ok()
    }
}

/// Testing utilities
pub mod testing {
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread::{self, ThreadId};

    /// One recorded action invocation
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Call<T> {
        /// Item the action was invoked with
        pub item: T,
        /// Thread the action ran on
        pub thread: ThreadId,
        /// Name of that thread, if any
        pub thread_name: Option<String>,
    }

    /// Shared, ordered log of action invocations.
    ///
    /// Cloning shares the underlying log, so a clone can be moved into an
    /// action while the original is inspected afterwards.
    #[derive(Debug)]
    pub struct CallLog<T> {
        calls: Arc<Mutex<Vec<Call<T>>>>,
    }

    impl<T> Clone for CallLog<T> {
        fn clone(&self) -> Self {
            Self {
                calls: Arc::clone(&self.calls),
            }
        }
    }

    impl<T> Default for CallLog<T> {
        fn default() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl<T: Clone> CallLog<T> {
        /// Create an empty log
        pub fn new() -> Self {
            Self::default()
        }

        /// Record an invocation on the current thread
        pub fn record(&self, item: T) {
            let current = thread::current();
            self.calls.lock().push(Call {
                item,
                thread: current.id(),
                thread_name: current.name().map(str::to_string),
            });
        }

        /// Items in the order they were recorded
        pub fn items(&self) -> Vec<T> {
            self.calls.lock().iter().map(|c| c.item.clone()).collect()
        }

        /// All recorded calls
        pub fn calls(&self) -> Vec<Call<T>> {
            self.calls.lock().clone()
        }

        /// Number of recorded calls
        pub fn len(&self) -> usize {
            self.calls.lock().len()
        }

        /// True when nothing was recorded
        pub fn is_empty(&self) -> bool {
            self.calls.lock().is_empty()
        }

        /// True when every call ran on `thread`
        pub fn all_on_thread(&self, thread: ThreadId) -> bool {
            self.calls.lock().iter().all(|c| c.thread == thread)
        }
    }
}
