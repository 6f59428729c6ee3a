//! Blob emulator: a content file plus an optional side-car metadata file.
//!
//! ```text
//! <blob-root>/<container>/<name>         content
//! <blob-root>/<container>/.meta/<name>   MetadataRecord
//! ```
//!
//! The filesystem is the shared store. An emulator only caches what the last
//! `fetch_attributes` (or download) observed, plus the outcome of the last
//! copy it performed.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::account::{name_to_path, AccountContext, METADATA_DIR};
use super::lock::{ensure_parent_dir, remove_file_if_exists, Access, LockedFile};
use super::metadata::MetadataRecord;
use super::retry::{retry_contended, RetryPolicy};
use crate::auth::{generate_sas_token, SignedResource};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{BlobProperties, BlobSasPermissions, CopyState, SharedAccessPolicy};

/// Characters left unescaped in blob URI path segments.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Where a copy reads from.
#[derive(Debug, Clone, Copy)]
pub enum CopySource<'a> {
    /// Another emulator on the same account.
    Blob(&'a BlobEmulator),
    /// A blob URI, resolved against the destination's account.
    Uri(&'a str),
}

impl<'a> From<&'a BlobEmulator> for CopySource<'a> {
    fn from(blob: &'a BlobEmulator) -> Self {
        CopySource::Blob(blob)
    }
}

impl<'a> From<&'a str> for CopySource<'a> {
    fn from(uri: &'a str) -> Self {
        CopySource::Uri(uri)
    }
}

/// One blob of one container.
#[derive(Debug, Clone)]
pub struct BlobEmulator {
    ctx: Arc<AccountContext>,
    container: String,
    name: String,
    content_path: PathBuf,
    metadata_path: PathBuf,
    properties: BlobProperties,
    metadata: HashMap<String, String>,
    copy_state: Option<CopyState>,
}

impl BlobEmulator {
    pub(crate) fn new(ctx: Arc<AccountContext>, container: &str, name: &str) -> Self {
        let container_dir = ctx.blob_root.join(container);
        let content_path = name_to_path(&container_dir, name);
        let metadata_path = name_to_path(&container_dir.join(METADATA_DIR), name);
        Self {
            ctx,
            container: container.to_string(),
            name: name.to_string(),
            content_path,
            metadata_path,
            properties: BlobProperties::default(),
            metadata: HashMap::new(),
            copy_state: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn content_path(&self) -> &Path {
        &self.content_path
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// Path-style URI, resolvable by
    /// [`StorageAccount::resolve_blob`](super::StorageAccount::resolve_blob).
    pub fn uri(&self) -> String {
        let name: Vec<String> = self
            .name
            .split('/')
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect();
        format!(
            "{}/{}/{}",
            self.ctx.config.blob_endpoint(),
            self.container,
            name.join("/")
        )
    }

    /// Properties as of the last fetch.
    pub fn properties(&self) -> &BlobProperties {
        &self.properties
    }

    /// Editable properties; only `content_type` is persisted, by `set_properties`.
    pub fn properties_mut(&mut self) -> &mut BlobProperties {
        &mut self.properties
    }

    /// Metadata as of the last fetch, plus any local edits.
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Editable metadata, persisted by `set_metadata`.
    pub fn metadata_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.metadata
    }

    /// Outcome of the last copy onto this blob made through this instance.
    pub fn copy_state(&self) -> Option<&CopyState> {
        self.copy_state.as_ref()
    }

    fn lock_policy(&self) -> &RetryPolicy {
        &self.ctx.settings().lock_retry
    }

    fn not_found(&self) -> StorageError {
        StorageError::with_message(
            ErrorCode::BlobNotFound,
            format!("Blob '{}/{}' does not exist.", self.container, self.name),
        )
        .with_path(&self.content_path)
    }

    /// True iff the content file is present.
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.content_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Removes content and metadata. Fails with `BlobNotFound` if there was
    /// no content.
    pub async fn delete(&mut self) -> StorageResult<()> {
        if !self.exists().await {
            return Err(self.not_found());
        }

        let content_path = self.content_path.as_path();
        let removed = retry_contended(content_path, self.lock_policy(), move || {
            remove_file_if_exists(content_path)
        })
        .await?;
        if !removed {
            return Err(self.not_found());
        }
        self.remove_metadata_file().await?;

        debug!(container = %self.container, blob = %self.name, "deleted blob");
        self.properties = BlobProperties::default();
        self.metadata.clear();
        Ok(())
    }

    /// Like [`delete`](Self::delete) but a missing blob is not an error.
    pub async fn delete_if_exists(&mut self) -> StorageResult<bool> {
        match self.delete().await {
            Ok(()) => Ok(true),
            Err(err) if err.code == ErrorCode::BlobNotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn remove_metadata_file(&self) -> StorageResult<bool> {
        let metadata_path = self.metadata_path.as_path();
        retry_contended(metadata_path, self.lock_policy(), move || {
            remove_file_if_exists(metadata_path)
        })
        .await
    }

    /// Reads the persisted record. A missing file reads as the default record.
    async fn load_record(&self) -> StorageResult<MetadataRecord> {
        match fs::metadata(&self.metadata_path).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(MetadataRecord::default())
            }
            Err(err) => return Err(StorageError::from_io(err, &self.metadata_path)),
        }

        let mut file =
            match LockedFile::open(&self.metadata_path, Access::Read, self.lock_policy()).await {
                Ok(file) => file,
                // Deleted between the check and the open.
                Err(err) if err.is_not_found() => return Ok(MetadataRecord::default()),
                Err(err) => return Err(err),
            };
        MetadataRecord::read_from_async(file.file_mut())
            .await
            .map_err(io_err(&self.metadata_path))
    }

    /// Refreshes cached properties and metadata from disk.
    pub async fn fetch_attributes(&mut self) -> StorageResult<()> {
        let stat = match fs::metadata(&self.content_path).await {
            Ok(stat) if stat.is_file() => stat,
            Ok(_) => return Err(self.not_found()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(self.not_found())
            }
            Err(err) => return Err(StorageError::from_io(err, &self.content_path)),
        };

        let record = self.load_record().await?;
        let last_modified = stat.modified().ok().map(DateTime::<Utc>::from);

        self.properties = BlobProperties {
            content_length: stat.len(),
            content_type: record
                .content_type
                .or_else(|| Some(self.ctx.settings().default_content_type.clone())),
            etag: last_modified
                .as_ref()
                .map(|modified| BlobProperties::etag_for(modified, stat.len())),
            last_modified,
        };
        self.metadata = record.metadata;
        Ok(())
    }

    /// Applies `update` to the persisted record under an exclusive lock and
    /// writes the result back in place of the old record.
    async fn update_record<F>(&self, update: F) -> StorageResult<MetadataRecord>
    where
        F: FnOnce(&mut MetadataRecord),
    {
        if !self.exists().await {
            return Err(self.not_found());
        }

        let path = self.metadata_path.as_path();
        ensure_parent_dir(path).await.map_err(io_err(path))?;
        let mut locked = LockedFile::open(path, Access::Write, self.lock_policy()).await?;

        let mut record = MetadataRecord::read_from_async(locked.file_mut())
            .await
            .map_err(io_err(path))?;
        update(&mut record);

        // Overwrite in place, then cut the tail: the file never holds an
        // empty record mid-update.
        let encoded = record.encode();
        let file = locked.file_mut();
        file.seek(SeekFrom::Start(0))
            .await
            .map_err(io_err(path))?;
        file.write_all(&encoded).await.map_err(io_err(path))?;
        file.flush().await.map_err(io_err(path))?;
        file.set_len(encoded.len() as u64)
            .await
            .map_err(io_err(path))?;
        Ok(record)
    }

    /// Merges the cached metadata into the persisted set. Keys not present in
    /// the cache keep their stored values.
    pub async fn set_metadata(&mut self) -> StorageResult<()> {
        let local = self.metadata.clone();
        let record = self
            .update_record(move |record| record.metadata.extend(local))
            .await?;
        self.metadata = record.metadata;
        Ok(())
    }

    /// Persists the cached content type. Nothing else is written.
    pub async fn set_properties(&mut self) -> StorageResult<()> {
        let content_type = self.properties.content_type.clone();
        self.update_record(move |record| record.content_type = content_type)
            .await?;
        Ok(())
    }

    /// Uploads `data`, replacing any previous content. Metadata is untouched.
    pub async fn upload_from_bytes(&mut self, data: &[u8]) -> StorageResult<()> {
        self.upload_from_stream(&mut &data[..]).await.map(|_| ())
    }

    /// Uploads `count` bytes of `buffer` starting at `offset`.
    pub async fn upload_from_bytes_range(
        &mut self,
        buffer: &[u8],
        offset: usize,
        count: usize,
    ) -> StorageResult<()> {
        let end = offset.checked_add(count).filter(|end| *end <= buffer.len());
        match end {
            Some(end) => self.upload_from_bytes(&buffer[offset..end]).await,
            None => Err(StorageError::with_message(
                ErrorCode::OutOfRangeInput,
                format!(
                    "offset {} + count {} exceeds buffer length {}",
                    offset,
                    count,
                    buffer.len()
                ),
            )),
        }
    }

    /// Uploads everything `source` yields. Returns the number of bytes written.
    pub async fn upload_from_stream<R>(&mut self, source: &mut R) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = self.content_path.clone();
        ensure_parent_dir(&path).await.map_err(io_err(&path))?;

        let mut locked = LockedFile::open(&path, Access::Write, self.lock_policy()).await?;
        locked.truncate().await.map_err(io_err(&path))?;
        let file = locked.file_mut();
        let written = tokio::io::copy(source, file)
            .await
            .map_err(io_err(&path))?;
        file.flush().await.map_err(io_err(&path))?;

        debug!(container = %self.container, blob = %self.name, bytes = written, "uploaded blob");
        self.properties.content_length = written;
        Ok(written)
    }

    /// Uploads the content of a local file.
    pub async fn upload_from_file(&mut self, source: impl AsRef<Path>) -> StorageResult<u64> {
        let source = source.as_ref();
        let mut reader = LockedFile::open(source, Access::Read, self.lock_policy()).await?;
        self.upload_from_stream(reader.file_mut()).await
    }

    /// Streams the whole content into `target`, then refreshes attributes.
    pub async fn download<W>(&mut self, target: &mut W) -> StorageResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let path = self.content_path.clone();
        let mut locked = self.open_for_read().await?;

        let mut buf = vec![0u8; self.ctx.settings().chunk_size.max(1)];
        let mut total = 0u64;
        let file = locked.file_mut();
        loop {
            let n = file.read(&mut buf).await.map_err(io_err(&path))?;
            if n == 0 {
                break;
            }
            target
                .write_all(&buf[..n])
                .await
                .map_err(io_err(&path))?;
            total += n as u64;
        }
        target.flush().await.map_err(io_err(&path))?;
        drop(locked);

        self.fetch_attributes().await?;
        Ok(total)
    }

    /// Downloads the whole content into memory.
    pub async fn download_to_bytes(&mut self) -> StorageResult<Bytes> {
        let mut out = Vec::new();
        self.download(&mut out).await?;
        Ok(Bytes::from(out))
    }

    /// Downloads into a local file, creating or truncating it.
    pub async fn download_to_file(&mut self, target: impl AsRef<Path>) -> StorageResult<u64> {
        let target = target.as_ref();
        ensure_parent_dir(target).await.map_err(io_err(target))?;
        let mut file = fs::File::create(target)
            .await
            .map_err(io_err(target))?;
        self.download(&mut file).await
    }

    /// Reads up to `count` bytes starting at `offset`.
    pub async fn download_range(&self, offset: u64, count: u64) -> StorageResult<Bytes> {
        let path = self.content_path.as_path();
        let mut locked = self.open_for_read().await?;
        let length = locked.len().await.map_err(io_err(path))?;
        if offset > length {
            return Err(StorageError::with_message(
                ErrorCode::OutOfRangeInput,
                format!("offset {} is beyond blob length {}", offset, length),
            ));
        }

        let file = locked.file_mut();
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(io_err(path))?;
        let mut out = Vec::with_capacity(count.min(length - offset) as usize);
        file.take(count)
            .read_to_end(&mut out)
            .await
            .map_err(io_err(path))?;
        Ok(Bytes::from(out))
    }

    async fn open_for_read(&self) -> StorageResult<LockedFile> {
        match LockedFile::open(&self.content_path, Access::Read, self.lock_policy()).await {
            Ok(file) => Ok(file),
            Err(err) if err.is_not_found() => Err(StorageError::with_message(
                ErrorCode::BlobNotFound,
                format!(
                    "Blob '{}/{}' does not exist: {}",
                    self.container, self.name, err.message
                ),
            )
            .with_path(&self.content_path)),
            Err(err) => Err(err),
        }
    }

    /// Copies content and metadata from `source` onto this blob.
    ///
    /// Returns the copy id. I/O failures do not fail the call; they are
    /// recorded as a `Failed` [`CopyState`]. Only an unusable source
    /// reference (bad URI, other account) is returned as an error.
    pub async fn start_copy_from<'a>(
        &mut self,
        source: impl Into<CopySource<'a>>,
    ) -> StorageResult<String> {
        let resolved;
        let source = match source.into() {
            CopySource::Blob(blob) => {
                if blob.ctx.blob_root != self.ctx.blob_root {
                    return Err(StorageError::with_message(
                        ErrorCode::CopyAcrossAccountsNotSupported,
                        format!(
                            "source root {} differs from destination root {}",
                            blob.ctx.blob_root.display(),
                            self.ctx.blob_root.display()
                        ),
                    ));
                }
                blob
            }
            CopySource::Uri(uri) => {
                resolved = super::StorageAccount::from_context(self.ctx.clone()).resolve_blob(uri)?;
                &resolved
            }
        };

        let copy_id = Uuid::new_v4().to_string();
        let source_uri = source.uri();
        let state = match self.copy_files(source).await {
            Ok(bytes) => {
                debug!(
                    source = %source_uri,
                    container = %self.container,
                    blob = %self.name,
                    bytes,
                    "copied blob"
                );
                CopyState::success(copy_id.clone(), source_uri, bytes)
            }
            Err(err) => {
                warn!(
                    source = %source_uri,
                    container = %self.container,
                    blob = %self.name,
                    "blob copy failed: {}",
                    err
                );
                CopyState::failed(copy_id.clone(), source_uri, err.to_string())
            }
        };
        self.copy_state = Some(state);
        Ok(copy_id)
    }

    async fn copy_files(&self, source: &BlobEmulator) -> StorageResult<u64> {
        if source.content_path == self.content_path {
            let stat = fs::metadata(&self.content_path)
                .await
                .map_err(io_err(&self.content_path))?;
            return Ok(stat.len());
        }

        let policy = &self.ctx.settings().copy_retry;
        ensure_parent_dir(&self.content_path)
            .await
            .map_err(io_err(&self.content_path))?;
        let bytes = copy_locked(&source.content_path, &self.content_path, policy).await?;

        if fs::metadata(&source.metadata_path).await.is_ok() {
            ensure_parent_dir(&self.metadata_path)
                .await
                .map_err(io_err(&self.metadata_path))?;
            copy_locked(&source.metadata_path, &self.metadata_path, policy).await?;
        } else {
            let metadata_path = self.metadata_path.as_path();
            retry_contended(metadata_path, policy, move || {
                remove_file_if_exists(metadata_path)
            })
            .await?;
        }
        Ok(bytes)
    }

    /// Access-signature token scoped to this blob.
    pub fn get_shared_access_signature(
        &self,
        permissions: BlobSasPermissions,
        policy: &SharedAccessPolicy,
    ) -> String {
        generate_sas_token(
            &self.ctx.settings().sas_version,
            SignedResource::Blob,
            &permissions.as_code(),
            policy,
            &format!(
                "/blob/{}/{}/{}",
                self.ctx.config.account, self.container, self.name
            ),
        )
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError {
    let path = path.to_path_buf();
    move |err| StorageError::from_io(err, &path)
}

/// Copies `src` over `dst`, holding a shared lock on the source and an
/// exclusive lock on the destination for the whole transfer.
async fn copy_locked(src: &Path, dst: &Path, policy: &RetryPolicy) -> StorageResult<u64> {
    let mut reader = LockedFile::open(src, Access::Read, policy).await?;
    let mut writer = LockedFile::open(dst, Access::Write, policy).await?;
    writer
        .truncate()
        .await
        .map_err(|e| StorageError::from_io(e, dst))?;
    let bytes = tokio::io::copy(reader.file_mut(), writer.file_mut())
        .await
        .map_err(|e| StorageError::from_io(e, dst))?;
    writer
        .file_mut()
        .flush()
        .await
        .map_err(|e| StorageError::from_io(e, dst))?;
    Ok(bytes)
}
