//! Bounded retry for operations that need a file another holder may have locked.

use rand::Rng;
use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Wait applied between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same wait every time.
    Fixed(Duration),
    /// Uniformly random wait in `[min, max]`.
    Jitter { min: Duration, max: Duration },
}

impl Backoff {
    /// Returns the wait before the next attempt.
    pub fn delay(&self) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Jitter { min, max } if max > min => {
                let millis = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
                Duration::from_millis(millis as u64)
            }
            Backoff::Jitter { min, .. } => min,
        }
    }
}

/// Attempt budget plus backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self::new(1, Backoff::Fixed(Duration::ZERO))
    }
}

/// Returns true if `err` means another handle currently holds the file.
///
/// Covers advisory lock contention (`EWOULDBLOCK` on Unix,
/// `ERROR_LOCK_VIOLATION` on Windows) and Windows sharing violations.
pub fn is_sharing_violation(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    let contended = fs2::lock_contended_error();
    if err.raw_os_error().is_some() && err.raw_os_error() == contended.raw_os_error() {
        return true;
    }
    // ERROR_SHARING_VIOLATION
    cfg!(windows) && err.raw_os_error() == Some(32)
}

/// Runs `op` until it succeeds, retrying while `is_transient` classifies the
/// failure as temporary.
///
/// Exhausting the budget on a transient failure yields a `ServerBusy` error
/// naming `path`. Any other failure is wrapped with [`StorageError::from_io`]
/// and returned immediately.
pub async fn retry_io<T, F, Fut>(
    path: &Path,
    policy: &RetryPolicy,
    is_transient: fn(&io::Error) -> bool,
    mut op: F,
) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) => {
                if attempt >= policy.max_attempts {
                    warn!(
                        path = %path.display(),
                        attempts = attempt,
                        "giving up on contended file: {}",
                        err
                    );
                    return Err(StorageError::busy(path, attempt));
                }
                let delay = policy.backoff.delay();
                debug!(
                    path = %path.display(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "file busy, retrying: {}",
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(StorageError::from_io(err, path)),
        }
    }
}

/// [`retry_io`] specialised to lock contention and sharing violations.
pub async fn retry_contended<T, F, Fut>(
    path: &Path,
    policy: &RetryPolicy,
    op: F,
) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    retry_io(path, policy, is_sharing_violation, op).await
}
