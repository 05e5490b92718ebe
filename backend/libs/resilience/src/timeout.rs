//! Deadline wrapper for fallible async operations

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, thiserror::Error)]
pub enum DeadlineError<E> {
    #[error("operation timed out after {0:?}")]
    Elapsed(Duration),
    #[error("operation failed: {0}")]
    Failed(E),
}

impl<E> DeadlineError<E> {
    pub fn is_elapsed(&self) -> bool {
        matches!(self, DeadlineError::Elapsed(_))
    }
}

/// Run `future` with an upper bound on its duration, keeping the
/// operation's own error type so callers can log it precisely.
pub async fn with_deadline<F, T, E>(duration: Duration, future: F) -> Result<T, DeadlineError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(duration, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DeadlineError::Failed(e)),
        Err(_) => Err(DeadlineError::Elapsed(duration)),
    }
}
