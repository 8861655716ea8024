//! Cancellation and deadline handle passed through every remote call

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::SyncError;

/// Cloneable cancellation context
///
/// Clones and children share one cancellation flag, so cancelling any of
/// them cancels all. Children may carry a tighter deadline.
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child context sharing the cancellation flag, expiring after `timeout`
    ///
    /// The parent's deadline still applies if it is earlier.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail with the matching fatal error if cancelled or past the deadline
    pub fn check(&self) -> Result<(), SyncError> {
        if self.is_cancelled() {
            return Err(SyncError::cancelled());
        }
        if self.remaining().is_some_and(|r| r.is_zero()) {
            return Err(SyncError::deadline());
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early on cancellation
    pub fn sleep(&self, duration: Duration) -> Result<(), SyncError> {
        const SLICE: Duration = Duration::from_millis(20);

        let until = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep(SLICE.min(until - now));
        }
    }
}
