//! File handles that carry an OS-level share lock for as long as they live.
//!
//! This is the only place that knows how share modes map onto the platform:
//! readers take a shared advisory lock, writers an exclusive one, and a lock
//! that cannot be taken immediately surfaces as a sharing violation for
//! [`retry_contended`](super::retry::retry_contended) to classify.

use fs2::FileExt;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};

use super::retry::{retry_contended, RetryPolicy};
use crate::error::StorageResult;

/// How a file is opened and which lock it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read-only, shared lock. Other readers may hold it too.
    Read,
    /// Read-only, exclusive lock. Used to lease queue messages.
    ReadExclusive,
    /// Read-write, created if missing, exclusive lock. Content is left as is
    /// until the caller truncates it under the lock.
    Write,
    /// Read-write on a file that must not exist yet, exclusive lock.
    CreateNew,
}

impl Access {
    fn options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Access::Read | Access::ReadExclusive => {
                options.read(true);
            }
            Access::Write => {
                options.read(true).write(true).create(true);
            }
            Access::CreateNew => {
                options.read(true).write(true).create_new(true);
            }
        }
        options
    }

    fn exclusive(&self) -> bool {
        !matches!(self, Access::Read)
    }
}

/// An open file plus the lock requested through [`Access`].
///
/// The lock is released when the handle is dropped.
#[derive(Debug)]
pub struct LockedFile {
    file: File,
    path: PathBuf,
}

impl LockedFile {
    /// Opens `path` and takes the lock without waiting.
    ///
    /// Contention comes back as an `io::Error` accepted by
    /// [`is_sharing_violation`](super::retry::is_sharing_violation).
    pub async fn try_open(path: &Path, access: Access) -> io::Result<Self> {
        let file = access.options().open(path).await?;
        let std_file = file.into_std().await;
        if access.exclusive() {
            std_file.try_lock_exclusive()?;
        } else {
            std_file.try_lock_shared()?;
        }
        Ok(Self {
            file: File::from_std(std_file),
            path: path.to_path_buf(),
        })
    }

    /// Opens `path`, retrying under `policy` while another holder has it locked.
    pub async fn open(path: &Path, access: Access, policy: &RetryPolicy) -> StorageResult<Self> {
        retry_contended(path, policy, move || Self::try_open(path, access)).await
    }

    /// Drops any previous content. Only meaningful under an exclusive lock.
    pub async fn truncate(&mut self) -> io::Result<()> {
        self.file.set_len(0).await
    }

    /// Current length of the underlying file.
    pub async fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata().await?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn into_file(self) -> File {
        self.file
    }
}

/// Creates every missing directory above `path`.
pub async fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Removes a file, treating "already gone" as success. Returns whether a
/// file was actually removed.
pub async fn remove_file_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::retry::is_sharing_violation;

    #[tokio::test]
    async fn test_exclusive_lock_blocks_readers_and_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"x").await.unwrap();

        let held = LockedFile::try_open(&path, Access::Write).await.unwrap();

        let err = LockedFile::try_open(&path, Access::Read).await.unwrap_err();
        assert!(is_sharing_violation(&err));
        let err = LockedFile::try_open(&path, Access::Write).await.unwrap_err();
        assert!(is_sharing_violation(&err));

        drop(held);
        LockedFile::try_open(&path, Access::Read).await.unwrap();
    }

    #[tokio::test]
    async fn test_shared_readers_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"x").await.unwrap();

        let _a = LockedFile::try_open(&path, Access::Read).await.unwrap();
        let _b = LockedFile::try_open(&path, Access::Read).await.unwrap();
        let err = LockedFile::try_open(&path, Access::Write).await.unwrap_err();
        assert!(is_sharing_violation(&err));
    }

    #[tokio::test]
    async fn test_create_new_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("msg");
        LockedFile::try_open(&path, Access::CreateNew).await.unwrap();

        let err = LockedFile::try_open(&path, Access::CreateNew).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }
}
