use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::AppError;

/// Single-flight gate for long-running operations plus their shared cancel
/// flag.
#[derive(Debug, Default)]
pub struct RunState {
    busy: AtomicBool,
    cancel_flag: Arc<AtomicBool>,
}

/// Holds the busy flag; releases it on drop, including on early return.
#[derive(Debug)]
pub struct BusyGuard<'a> {
    state: &'a RunState,
    operation: &'static str,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.state.busy.store(false, Ordering::Release);
        tracing::trace!(operation = self.operation, "busy flag released");
    }
}

impl RunState {
    /// Claims the busy flag and resets the cancel flag for the new run.
    pub fn try_begin(&self, operation: &'static str) -> Result<BusyGuard<'_>, AppError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(operation, "rejected while busy");
            return Err(AppError::Busy);
        }
        self.cancel_flag.store(false, Ordering::Relaxed);
        Ok(BusyGuard {
            state: self,
            operation,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn ensure_idle(&self) -> Result<(), AppError> {
        if self.is_busy() {
            return Err(AppError::Busy);
        }
        Ok(())
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel_flag.clone()
    }

    /// Requests cooperative cancellation. Returns whether a run was active.
    pub fn mark_cancelled(&self) -> bool {
        self.cancel_flag.store(true, Ordering::Relaxed);
        self.is_busy()
    }
}

pub fn is_cancelled(cancel_flag: &AtomicBool) -> bool {
    cancel_flag.load(Ordering::Relaxed)
}
