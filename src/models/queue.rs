//! Queue message envelope.

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A message handed out by a dequeue or peek.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// File name of the message inside the queue directory.
    pub id: String,
    /// Fresh token per dequeue. Not checked on delete.
    pub pop_receipt: Option<String>,
    pub body: Bytes,
    pub inserted_on: Option<DateTime<Utc>>,
    pub dequeue_count: u32,
}

impl QueueMessage {
    /// Body as UTF-8 text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}
