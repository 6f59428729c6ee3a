//! Queue emulator: one directory per queue, one file per message.
//!
//! Message file names are `<ticks>.<counter>.<pid>`: UTC ticks (100 ns since
//! 0001-01-01), a process-wide counter and the OS process id, zero-padded so
//! that lexicographic order is creation order. Bodies are staged under a
//! dot-prefixed name and hard-linked into place, so a listed message is
//! always complete.
//!
//! A dequeued message stays leased for as long as this process keeps its
//! handle in the in-flight table; the handle carries an exclusive lock, so
//! other dequeuers (in any process) skip the file until it is deleted.

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};
use uuid::Uuid;

use super::account::AccountContext;
use super::lock::{remove_file_if_exists, Access, LockedFile};
use super::retry::{is_sharing_violation, retry_contended, retry_io};
use crate::auth::{generate_sas_token, SignedResource};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{QueueMessage, QueueSasPermissions, SharedAccessPolicy};

/// Ticks between 0001-01-01 and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Per-process sequence number for message names.
static MESSAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Leased messages of this process, keyed by message id.
fn in_flight() -> &'static DashMap<String, LockedFile> {
    static IN_FLIGHT: OnceLock<DashMap<String, LockedFile>> = OnceLock::new();
    IN_FLIGHT.get_or_init(DashMap::new)
}

fn utc_ticks(now: DateTime<Utc>) -> i64 {
    UNIX_EPOCH_TICKS + now.timestamp_nanos_opt().unwrap_or_default() / 100
}

/// Generates the next message file name.
pub fn next_message_id() -> String {
    let ticks = utc_ticks(Utc::now());
    let counter = MESSAGE_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{:019}.{:020}.{}", ticks, counter, std::process::id())
}

/// Recovers the enqueue time from a message id.
pub fn message_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let ticks: i64 = id.split('.').next()?.parse().ok()?;
    let since_epoch = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    Some(Utc.timestamp_nanos(since_epoch.checked_mul(100)?))
}

fn is_message_file(name: &str) -> bool {
    !name.starts_with('.')
}

/// Creation failures worth another attempt with a fresh name.
fn is_transient_create(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::AlreadyExists || is_sharing_violation(err)
}

/// One queue: `<queue-root>/<name>`.
#[derive(Debug, Clone)]
pub struct QueueEmulator {
    ctx: Arc<AccountContext>,
    name: String,
    path: PathBuf,
}

impl QueueEmulator {
    pub(crate) fn new(ctx: Arc<AccountContext>, name: &str) -> Self {
        let path = ctx.queue_root.join(name);
        Self {
            ctx,
            name: name.to_string(),
            path,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn uri(&self) -> String {
        format!("{}/{}", self.ctx.config.queue_endpoint(), self.name)
    }

    fn not_found(&self) -> StorageError {
        StorageError::with_message(
            ErrorCode::QueueNotFound,
            format!("Queue '{}' does not exist.", self.name),
        )
        .with_path(&self.path)
    }

    fn queue_error(&self, err: StorageError) -> StorageError {
        if err.is_not_found() {
            self.not_found()
        } else {
            err
        }
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Creates the queue, failing if it already exists.
    pub async fn create(&self) -> StorageResult<()> {
        if self.exists().await {
            return Err(StorageError::new(ErrorCode::QueueAlreadyExists).with_path(&self.path));
        }
        self.create_if_not_exists().await.map(|_| ())
    }

    /// Ensures the queue directory exists. Returns whether it was created.
    pub async fn create_if_not_exists(&self) -> StorageResult<bool> {
        if self.exists().await {
            return Ok(false);
        }
        fs::create_dir_all(&self.path)
            .await
            .map_err(|e| StorageError::from_io(e, &self.path))?;
        info!(queue = %self.name, "created queue");
        Ok(true)
    }

    /// Removes the queue and every message in it.
    pub async fn delete(&self) -> StorageResult<()> {
        let path = self.path.as_path();
        let policy = &self.ctx.settings().lock_retry;
        retry_contended(path, policy, move || fs::remove_dir_all(path))
            .await
            .map_err(|e| self.queue_error(e))?;
        self.release_leases();
        info!(queue = %self.name, "deleted queue");
        Ok(())
    }

    pub async fn delete_if_exists(&self) -> StorageResult<bool> {
        match self.delete().await {
            Ok(()) => Ok(true),
            Err(err) if err.code == ErrorCode::QueueNotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Drops every lease this process holds on messages of this queue.
    fn release_leases(&self) {
        in_flight().retain(|_, file| !file.path().starts_with(&self.path));
    }

    /// Adds a message and returns its id.
    pub async fn enqueue(&self, body: impl AsRef<[u8]>) -> StorageResult<String> {
        let body = body.as_ref();
        let dir = self.path.as_path();
        let policy = &self.ctx.settings().enqueue_retry;

        let id = retry_io(dir, policy, is_transient_create, move || async move {
            let id = next_message_id();
            publish_message(dir, &id, body).await?;
            Ok::<_, io::Error>(id)
        })
        .await
        .map_err(|e| self.queue_error(e))?;

        debug!(queue = %self.name, id = %id, bytes = body.len(), "enqueued message");
        Ok(id)
    }

    /// Message file names, oldest first.
    async fn list_message_ids(&self) -> StorageResult<Vec<String>> {
        let mut entries = fs::read_dir(&self.path)
            .await
            .map_err(|e| self.queue_error(StorageError::from_io(e, &self.path)))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::from_io(e, &self.path))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_message_file(&name) {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Locks the oldest message nobody has leased.
    async fn lease_oldest(&self) -> StorageResult<Option<(String, LockedFile, Bytes)>> {
        for id in self.list_message_ids().await? {
            let path = self.path.join(&id);
            let mut file = match self.try_lease(&path).await {
                Ok(Some(file)) => file,
                Ok(None) => continue,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::from_io(err, &path)),
            };
            // Deleted by its previous holder between our open and our lock.
            if fs::metadata(&path).await.is_err() {
                continue;
            }

            let mut body = Vec::new();
            file.file_mut()
                .read_to_end(&mut body)
                .await
                .map_err(|e| StorageError::from_io(e, &path))?;
            return Ok(Some((id, file, Bytes::from(body))));
        }
        Ok(None)
    }

    /// Takes the exclusive lock that marks `path` as leased.
    ///
    /// An exclusive holder means another lease and the file is skipped at
    /// once. Shared holders (peekers) are waited out under the lock policy.
    async fn try_lease(&self, path: &Path) -> io::Result<Option<LockedFile>> {
        let policy = &self.ctx.settings().lock_retry;
        let mut attempt = 1;
        loop {
            match LockedFile::try_open(path, Access::ReadExclusive).await {
                Ok(file) => return Ok(Some(file)),
                Err(err) if is_sharing_violation(&err) => {}
                Err(err) => return Err(err),
            }
            if is_leased(path).await? || attempt >= policy.max_attempts {
                return Ok(None);
            }
            let delay = policy.backoff.delay();
            debug!(
                path = %path.display(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "message has readers, retrying lease"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Leases the oldest available message, or returns `None` when every
    /// message is leased or the queue is empty.
    pub async fn dequeue(&self) -> StorageResult<Option<QueueMessage>> {
        let Some((id, file, body)) = self.lease_oldest().await? else {
            return Ok(None);
        };

        let message = QueueMessage {
            inserted_on: message_timestamp(&id),
            pop_receipt: Some(Uuid::new_v4().to_string()),
            dequeue_count: 1,
            body,
            id: id.clone(),
        };
        in_flight().insert(id, file);
        debug!(queue = %self.name, id = %message.id, "dequeued message");
        Ok(Some(message))
    }

    /// Reads the oldest unleased message without leasing it.
    ///
    /// Message files never change once published, so the body is read
    /// without holding a lock.
    pub async fn peek(&self) -> StorageResult<Option<QueueMessage>> {
        for id in self.list_message_ids().await? {
            let path = self.path.join(&id);
            let read = match is_leased(&path).await {
                Ok(true) => continue,
                Ok(false) => fs::read(&path).await,
                Err(err) => Err(err),
            };
            let body = match read {
                Ok(body) => body,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::from_io(err, &path)),
            };
            return Ok(Some(QueueMessage {
                inserted_on: message_timestamp(&id),
                pop_receipt: None,
                dequeue_count: 0,
                body: Bytes::from(body),
                id,
            }));
        }
        Ok(None)
    }

    /// Deletes a message by id and releases its lease.
    ///
    /// `pop_receipt` is accepted for interface parity and not checked: anyone
    /// holding the id may delete the message.
    pub async fn delete_message(&self, message_id: &str, _pop_receipt: &str) -> StorageResult<()> {
        if message_id.is_empty() || !is_message_file(message_id) || message_id.contains(['/', '\\'])
        {
            return Err(StorageError::with_message(
                ErrorCode::InvalidInput,
                format!("'{}' is not a message id", message_id),
            ));
        }

        let path = self.path.join(message_id);
        let policy = &self.ctx.settings().lock_retry;
        let file_path = path.as_path();
        let removed =
            retry_contended(file_path, policy, move || remove_file_if_exists(file_path)).await;

        // Always close the lease handle, whatever happened to the file.
        in_flight().remove(message_id);

        match removed {
            Ok(true) => {
                debug!(queue = %self.name, id = %message_id, "deleted message");
                Ok(())
            }
            Ok(false) => Err(StorageError::with_message(
                ErrorCode::MessageNotFound,
                format!("Message '{}' does not exist in queue '{}'.", message_id, self.name),
            )
            .with_path(path)),
            Err(err) => Err(err),
        }
    }

    /// Number of message files, leased ones included.
    pub async fn approximate_message_count(&self) -> StorageResult<usize> {
        Ok(self.list_message_ids().await?.len())
    }

    /// Deletes every message and drops this process's leases on them.
    pub async fn clear(&self) -> StorageResult<()> {
        let policy = &self.ctx.settings().lock_retry;
        for id in self.list_message_ids().await? {
            let path = self.path.join(&id);
            let file_path = path.as_path();
            retry_contended(file_path, policy, move || remove_file_if_exists(file_path)).await?;
        }
        self.release_leases();
        Ok(())
    }

    /// Access-signature token scoped to this queue.
    pub fn get_shared_access_signature(
        &self,
        permissions: QueueSasPermissions,
        policy: &SharedAccessPolicy,
    ) -> String {
        generate_sas_token(
            &self.ctx.settings().sas_version,
            SignedResource::Queue,
            &permissions.as_code(),
            policy,
            &format!("/queue/{}/{}", self.ctx.config.account, self.name),
        )
    }
}

/// True while some handle holds the exclusive lock of a dequeue lease.
async fn is_leased(path: &Path) -> io::Result<bool> {
    match LockedFile::try_open(path, Access::Read).await {
        Ok(_) => Ok(false),
        Err(err) if is_sharing_violation(&err) => Ok(true),
        Err(err) => Err(err),
    }
}

/// Writes `body` under a staging name, then links it in as `id`.
///
/// The link fails with `AlreadyExists` on a name collision; the staging file
/// is removed in every case.
async fn publish_message(dir: &Path, id: &str, body: &[u8]) -> io::Result<()> {
    let staging = dir.join(format!(".{}.tmp", id));
    let result = write_and_link(&staging, &dir.join(id), body).await;
    let _ = remove_file_if_exists(&staging).await;
    result
}

async fn write_and_link(staging: &Path, target: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = LockedFile::try_open(staging, Access::CreateNew).await?;
    file.file_mut().write_all(body).await?;
    file.file_mut().flush().await?;
    file.file_mut().sync_data().await?;
    drop(file);
    fs::hard_link(staging, target).await
}
