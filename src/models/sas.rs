//! Shared access policies and permission sets.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Permissions grantable on a blob or container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobSasPermissions {
    pub read: bool,
    pub add: bool,
    pub create: bool,
    pub write: bool,
    pub delete: bool,
    pub list: bool,
}

impl BlobSasPermissions {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    pub fn all() -> Self {
        Self {
            read: true,
            add: true,
            create: true,
            write: true,
            delete: true,
            list: true,
        }
    }

    /// Permission letters in canonical `racwdl` order.
    pub fn as_code(&self) -> String {
        [
            (self.read, 'r'),
            (self.add, 'a'),
            (self.create, 'c'),
            (self.write, 'w'),
            (self.delete, 'd'),
            (self.list, 'l'),
        ]
        .iter()
        .filter(|(granted, _)| *granted)
        .map(|(_, code)| *code)
        .collect()
    }

    /// Parses permission letters in any order. Unknown letters yield `None`.
    pub fn parse(code: &str) -> Option<Self> {
        let mut perms = Self::default();
        for c in code.chars() {
            match c {
                'r' => perms.read = true,
                'a' => perms.add = true,
                'c' => perms.create = true,
                'w' => perms.write = true,
                'd' => perms.delete = true,
                'l' => perms.list = true,
                _ => return None,
            }
        }
        Some(perms)
    }
}

/// Permissions grantable on a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSasPermissions {
    pub read: bool,
    pub add: bool,
    pub update: bool,
    pub process: bool,
}

impl QueueSasPermissions {
    /// Permission letters in canonical `raup` order.
    pub fn as_code(&self) -> String {
        [
            (self.read, 'r'),
            (self.add, 'a'),
            (self.update, 'u'),
            (self.process, 'p'),
        ]
        .iter()
        .filter(|(granted, _)| *granted)
        .map(|(_, code)| *code)
        .collect()
    }
}

/// Validity window of an access signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedAccessPolicy {
    pub start: Option<DateTime<Utc>>,
    pub expiry: DateTime<Utc>,
}

impl SharedAccessPolicy {
    pub fn new(start: Option<DateTime<Utc>>, expiry: DateTime<Utc>) -> Self {
        Self { start, expiry }
    }

    /// Valid from now for `duration`.
    pub fn valid_for(duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            start: Some(now),
            expiry: now + duration,
        }
    }
}
