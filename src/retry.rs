//! Bounded retry with a fixed delay
//!
//! The only place the core retries on its own is around lock markers:
//! creating a marker someone else holds, or removing one that is momentarily
//! busy. Everything else fails the current call and is retried at the cycle
//! level by the orchestrator.
//!
//! # Example
//!
//! ```no_run
//! use primenet_manager::retry::{FixedRetry, IsRetryable, with_fixed_retry};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Busy,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "busy")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let policy = FixedRetry::new(5, Duration::from_secs(5));
//! with_fixed_retry(&policy, || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, ErrorClass};
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Io(e) | Error::FileIo { source: e, .. } => e.is_retryable(),
            other => matches!(
                other.class(),
                ErrorClass::TransientNetwork | ErrorClass::TransientLock
            ),
        }
    }
}

impl IsRetryable for std::io::Error {
    fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            // marker held by another process
            std::io::ErrorKind::AlreadyExists
                // Windows reports a file being deleted or held open this way
                | std::io::ErrorKind::PermissionDenied
                | std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut
        )
    }
}

/// Fixed-delay retry policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedRetry {
    /// Total number of attempts, including the first one
    pub attempts: u32,
    /// Pause between two attempts
    pub delay: Duration,
}

impl FixedRetry {
    /// Create a policy; `attempts` is raised to at least one
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

impl Default for FixedRetry {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5))
    }
}

/// Execute an async operation, retrying retryable failures with a fixed delay
///
/// Returns the first success, the first non-retryable error, or the last
/// error once `policy.attempts` attempts have been made.
pub async fn with_fixed_retry<F, Fut, T, E>(policy: &FixedRetry, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(attempts = attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < policy.attempts => {
                tracing::debug!(
                    error = %e,
                    attempt,
                    max_attempts = policy.attempts,
                    delay_ms = policy.delay.as_millis(),
                    "operation failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(error = %e, attempts = attempt, "retry attempts exhausted");
                }
                return Err(e);
            }
        }
    }
}
