//! Azurite-fs: filesystem-backed Azure Blob and Queue Storage emulator.
//!
//! Blobs and queue messages live as plain files under a root directory, so
//! several processes on one machine can share an emulated account. Lock
//! contention, ordering and copy outcomes are reproduced with OS file locks
//! and exclusive file creation.
//!
//! # Example
//!
//! ```no_run
//! use azurite_fs::StorageAccount;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), azurite_fs::StorageError> {
//!     let account = StorageAccount::at("/tmp/azurite-fs");
//!
//!     let mut blob = account.blob("reports", "2024/q1.csv")?;
//!     blob.upload_from_bytes(b"id,total\n1,42\n").await?;
//!     blob.metadata_mut().insert("owner".into(), "finance".into());
//!     blob.set_metadata().await?;
//!
//!     let queue = account.queue("jobs")?;
//!     queue.create_if_not_exists().await?;
//!     queue.enqueue("render q1").await?;
//!     if let Some(message) = queue.dequeue().await? {
//!         queue.delete_message(&message.id, "").await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;

// Re-exports for convenience
pub use config::{Args, Command, Config, EmulatorSettings, DEFAULT_ACCOUNT, DEFAULT_CONTENT_TYPE};
pub use error::{ErrorCode, StorageError, StorageResult};
pub use models::{
    BlobProperties, BlobSasPermissions, CopyState, CopyStatus, QueueMessage,
    QueueSasPermissions, SharedAccessPolicy,
};
pub use storage::{
    BlobEmulator, ContainerEmulator, CopySource, QueueEmulator, StorageAccount,
};
