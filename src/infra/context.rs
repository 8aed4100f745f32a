//! Cooperative cancellation context for blocking operations.
//!
//! The core runs on plain threads; network calls and scans check the context
//! before each blocking step and stop early when it is cancelled or past its
//! deadline. Cancelling a scan yields a partial result; cancelling a
//! submission yields [`SignerError::Cancelled`] without retry.

use crate::infra::error::{SignerError, SignerResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Carries a deadline and a cancellation signal across threads.
#[derive(Debug, Clone)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    /// Context without deadline; cancellable via [`Context::cancel`].
    #[must_use]
    pub fn background() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Derived context whose deadline is the sooner of the parent's and now+`timeout`.
    /// Cancellation is shared with the parent.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(deadline),
        }
    }

    /// Signal cancellation to every holder of this context (and children).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Error out if cancelled or past the deadline. Called before each blocking step.
    pub fn check(&self) -> SignerResult<()> {
        if self.is_cancelled() {
            return Err(SignerError::Cancelled);
        }
        Ok(())
    }

    /// Time remaining until the deadline, clamped to `fallback` when no deadline is set.
    #[must_use]
    pub fn remaining(&self, fallback: Duration) -> Duration {
        match self.deadline {
            Some(d) => d.saturating_duration_since(Instant::now()).min(fallback),
            None => fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_not_cancelled() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert!(matches!(child.check(), Err(SignerError::Cancelled)));
    }

    #[test]
    fn test_elapsed_deadline_cancels() {
        let ctx = Context::background().with_timeout(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_child_deadline_never_exceeds_parent() {
        let parent = Context::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(3600));
        assert!(child.remaining(Duration::from_secs(7200)) <= Duration::from_millis(10));
    }
}
