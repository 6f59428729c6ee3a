//! Filesystem-backed storage for the blob and queue emulators.

mod account;
mod blob;
mod container;
mod lock;
mod metadata;
mod queue;
mod retry;

pub use account::{validate_blob_name, validate_resource_name, StorageAccount, METADATA_DIR};
pub use blob::{BlobEmulator, CopySource};
pub use container::ContainerEmulator;
pub use lock::{Access, LockedFile};
pub use metadata::MetadataRecord;
pub use queue::{message_timestamp, next_message_id, QueueEmulator};
pub use retry::{is_sharing_violation, retry_contended, retry_io, Backoff, RetryPolicy};
