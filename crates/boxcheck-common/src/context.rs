//! Deadline and cancellation context bounding one test invocation.
//!
//! A [`Context`] carries an optional deadline and a shared [`CancelToken`].
//! Every blocking loop in the harness sleeps through [`Context::sleep`], so
//! cancelling the token or crossing the deadline wakes it promptly.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Reason a context stopped a blocking operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// The cancel token was triggered.
    Cancelled,
    /// The context deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "context cancelled"),
            Self::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

/// Shared, clonable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes every sleeper.
    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.inner.signal.notify_all();
    }

    /// Returns whether the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks for `timeout` or until cancelled. Returns `true` if cancelled.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .inner
            .signal
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Deadline plus cancel token for one invocation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    token: CancelToken,
}

impl Context {
    /// A context with no deadline and a fresh token.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context with no deadline driven by an existing token.
    #[must_use]
    pub const fn with_token(token: CancelToken) -> Self {
        Self {
            deadline: None,
            token,
        }
    }

    /// Derives a context whose deadline is at most `timeout` from now.
    ///
    /// The derived context shares the parent's cancel token.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a context whose deadline is the earlier of `at` and the
    /// parent's deadline.
    #[must_use]
    pub fn with_deadline(&self, at: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < at => existing,
            _ => at,
        };
        Self {
            deadline: Some(deadline),
            token: self.token.clone(),
        }
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the cancel token.
    #[must_use]
    pub const fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Time left before the deadline, or `None` without a deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Clamps `duration` to the time left before the deadline.
    #[must_use]
    pub fn bound(&self, duration: Duration) -> Duration {
        self.remaining().map_or(duration, |left| duration.min(left))
    }

    /// Returns an error if the context is cancelled or expired.
    ///
    /// # Errors
    ///
    /// Returns the [`Interruption`] that ended the context.
    pub fn check(&self) -> Result<(), Interruption> {
        if self.token.is_cancelled() {
            return Err(Interruption::Cancelled);
        }
        if self.remaining().is_some_and(|left| left.is_zero()) {
            return Err(Interruption::DeadlineExceeded);
        }
        Ok(())
    }

    /// Sleeps for `duration`, waking early on cancellation or deadline.
    ///
    /// # Errors
    ///
    /// Returns the [`Interruption`] if the sleep was cut short.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interruption> {
        self.check()?;
        let wait = self.bound(duration);
        if self.token.wait(wait) {
            return Err(Interruption::Cancelled);
        }
        if wait < duration {
            return Err(Interruption::DeadlineExceeded);
        }
        Ok(())
    }
}
