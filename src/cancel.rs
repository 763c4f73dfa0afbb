use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;

use crate::error::SqlMigrateError;

/// Cooperative cancellation for a migration run.
///
/// Clones share the same flag, so an operator-facing handle (a signal handler,
/// another thread) can stop a run that is blocked inside discovery or inside a
/// long-running statement. An optional deadline turns the same token into a
/// timeout.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    interrupt_token: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a deadline `timeout` from now. The deadline is not shared with
    /// tokens cloned before this call. A timeout too large to represent as an
    /// `Instant` leaves the token without a deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        if self.deadline.is_none() {
            warn!("Timeout of {:?} is out of range, running without a deadline", timeout);
        }
        self
    }

    pub fn cancel(&self) {
        self.interrupt_token.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.interrupt_token.load(Ordering::Acquire) {
            return true;
        }

        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    pub fn check(&self) -> Result<(), SqlMigrateError> {
        if self.is_cancelled() {
            Err(SqlMigrateError::Interrupted)
        } else {
            Ok(())
        }
    }
}
