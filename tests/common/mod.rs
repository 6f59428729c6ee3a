//! Common test utilities.

#![allow(dead_code)]

use std::time::Duration;
use tempfile::TempDir;

use azurite_fs::storage::{Backoff, RetryPolicy};
use azurite_fs::{Config, StorageAccount};

/// Storage account over a throwaway directory.
pub struct TestAccount {
    pub account: StorageAccount,
    // Keeps the directory alive for the lifetime of the test.
    pub dir: TempDir,
}

impl TestAccount {
    /// Creates an account with short retry budgets so contention tests
    /// finish quickly.
    pub fn new() -> Self {
        Self::with_lock_retry(RetryPolicy::new(3, Backoff::Fixed(Duration::from_millis(5))))
    }

    /// Creates an account whose content and metadata locks retry under `lock_retry`.
    pub fn with_lock_retry(lock_retry: RetryPolicy) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_location(dir.path());
        config.settings.lock_retry = lock_retry;
        config.settings.copy_retry = RetryPolicy::new(3, Backoff::Fixed(Duration::from_millis(5)));
        config.settings.chunk_size = 7;

        Self {
            account: StorageAccount::new(config),
            dir,
        }
    }
}

impl std::ops::Deref for TestAccount {
    type Target = StorageAccount;

    fn deref(&self) -> &StorageAccount {
        &self.account
    }
}
