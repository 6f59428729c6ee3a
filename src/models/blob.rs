//! Blob data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Copy status for blob copy operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyStatus {
    Success,
    Failed,
}

impl CopyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStatus::Success => "success",
            CopyStatus::Failed => "failed",
        }
    }
}

/// Terminal outcome of a copy onto a blob.
///
/// Copies complete synchronously, so the status is always `Success` or
/// `Failed` by the time a caller can observe it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyState {
    /// Identifier returned by the copy call.
    pub copy_id: String,
    /// URI of the copy source.
    pub source: String,
    pub status: CopyStatus,
    /// Failure detail, set only for failed copies.
    pub status_description: Option<String>,
    pub completion_time: DateTime<Utc>,
    pub bytes_copied: u64,
    pub total_bytes: u64,
}

impl CopyState {
    pub fn success(copy_id: String, source: String, bytes: u64) -> Self {
        Self {
            copy_id,
            source,
            status: CopyStatus::Success,
            status_description: None,
            completion_time: Utc::now(),
            bytes_copied: bytes,
            total_bytes: bytes,
        }
    }

    pub fn failed(copy_id: String, source: String, description: impl Into<String>) -> Self {
        Self {
            copy_id,
            source,
            status: CopyStatus::Failed,
            status_description: Some(description.into()),
            completion_time: Utc::now(),
            bytes_copied: 0,
            total_bytes: 0,
        }
    }

    /// Progress in the service's `copied/total` form.
    pub fn progress(&self) -> String {
        format!("{}/{}", self.bytes_copied, self.total_bytes)
    }
}

/// Observable attributes of a blob, refreshed by `fetch_attributes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobProperties {
    pub content_length: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl BlobProperties {
    /// Builds the ETag the emulator reports for a given file state.
    pub fn etag_for(last_modified: &DateTime<Utc>, length: u64) -> String {
        format!(
            "\"0x{:X}{:X}\"",
            last_modified.timestamp_nanos_opt().unwrap_or_default(),
            length
        )
    }
}
