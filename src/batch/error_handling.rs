//! Per-item failure capture.
//!
//! Every action invocation goes through [`invoke`], which turns both an
//! `Err` return and a panic into an [`ItemFailure`]. Nothing raised by an
//! action is dropped, whichever mode the batch runs in.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};

/// Kind of failure raised by an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The action returned an error
    Error,
    /// The action panicked
    Panic,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Error => write!(f, "error"),
            FailureKind::Panic => write!(f, "panic"),
        }
    }
}

/// A failed item, identified by its position in the input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Index of the item in the submitted batch
    pub index: usize,
    /// Whether the action returned an error or panicked
    pub kind: FailureKind,
    /// Rendered error or panic message
    pub message: String,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item {} ({}): {}", self.index, self.kind, self.message)
    }
}

/// Outcome of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ItemOutcome {
    Completed,
    Failed(ItemFailure),
    Skipped,
}

impl ItemOutcome {
    pub(crate) fn is_failure(&self) -> bool {
        matches!(self, ItemOutcome::Failed(_))
    }
}

/// Run `action` on one item, capturing errors and panics
pub(crate) fn invoke<T, F, E>(action: &F, index: usize, item: T) -> ItemOutcome
where
    F: Fn(T) -> Result<(), E>,
    E: fmt::Display,
{
    match panic::catch_unwind(AssertUnwindSafe(|| action(item))) {
        Ok(Ok(())) => ItemOutcome::Completed,
        Ok(Err(e)) => ItemOutcome::Failed(ItemFailure {
            index,
            kind: FailureKind::Error,
            message: e.to_string(),
        }),
        Err(payload) => ItemOutcome::Failed(ItemFailure {
            index,
            kind: FailureKind::Panic,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Tallies outcomes as they arrive on the calling thread
#[derive(Debug, Default)]
pub(crate) struct OutcomeTally {
    pub(crate) completed: usize,
    pub(crate) skipped: usize,
    pub(crate) failures: Vec<ItemFailure>,
}

impl OutcomeTally {
    pub(crate) fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Completed => self.completed += 1,
            ItemOutcome::Failed(failure) => {
                self.completed += 1;
                self.failures.push(failure);
            }
            ItemOutcome::Skipped => self.skipped += 1,
        }
    }

    /// Items that have finished or been skipped so far
    pub(crate) fn settled(&self) -> usize {
        self.completed + self.skipped
    }

    pub(crate) fn into_sorted_failures(mut self) -> Vec<ItemFailure> {
        self.failures.sort_by_key(|f| f.index);
        self.failures
    }
}
