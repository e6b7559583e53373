use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use strata_types::error::{Result, StrataError};

/// Cancellation scope shared by the threads working on one snapshot.
///
/// The first failure is recorded and flips the cancel flag; later failures
/// are dropped. An external shutdown flag (set by the signal handler) also
/// counts as cancellation.
pub struct TaskGroup<'a> {
    cancelled: AtomicBool,
    first_error: Mutex<Option<StrataError>>,
    shutdown: Option<&'a AtomicBool>,
}

impl<'a> TaskGroup<'a> {
    pub fn new(shutdown: Option<&'a AtomicBool>) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            first_error: Mutex::new(None),
            shutdown,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.interrupted()
    }

    /// `Err(Interrupted)` once the group has been cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(StrataError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Record `err` if it is the first failure and cancel the group.
    pub fn fail(&self, err: StrataError) {
        // A poisoned slot still cancels; only the error report is lost.
        if let Ok(mut slot) = self.first_error.lock() {
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.cancel();
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Remove and return the recorded first error.
    pub fn take_error(&self) -> Option<StrataError> {
        match self.first_error.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Whether the external shutdown flag has fired.
    pub fn interrupted(&self) -> bool {
        self.shutdown.is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Final outcome: the first recorded error, else `Interrupted` if the
    /// shutdown flag fired, else success.
    pub fn finish(self) -> Result<()> {
        if let Some(err) = self.take_error() {
            return Err(err);
        }
        if self.interrupted() {
            return Err(StrataError::Interrupted);
        }
        Ok(())
    }
}
