//! Storage account: binds a configuration to a root directory and hands out
//! container, blob and queue emulators.

use percent_encoding::percent_decode_str;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use url::Url;

use super::blob::BlobEmulator;
use super::container::ContainerEmulator;
use super::queue::QueueEmulator;
use crate::config::{Config, EmulatorSettings};
use crate::error::{ErrorCode, StorageError, StorageResult};

/// Directory under a container that mirrors its blob tree with metadata files.
pub const METADATA_DIR: &str = ".meta";

/// State shared by every emulator created from one account.
#[derive(Debug)]
pub(crate) struct AccountContext {
    pub(crate) config: Config,
    pub(crate) blob_root: PathBuf,
    pub(crate) queue_root: PathBuf,
}

impl AccountContext {
    pub(crate) fn settings(&self) -> &EmulatorSettings {
        &self.config.settings
    }
}

/// Entry point to the emulated storage account.
///
/// Creating an account, or any emulator from it, never touches the
/// filesystem; directories appear on the first explicit create or upload.
#[derive(Debug, Clone)]
pub struct StorageAccount {
    ctx: Arc<AccountContext>,
}

impl StorageAccount {
    pub fn new(config: Config) -> Self {
        let location = absolute(&config.location);
        let ctx = AccountContext {
            blob_root: location.join("blobs"),
            queue_root: location.join("queues"),
            config: Config {
                location,
                ..config
            },
        };
        Self { ctx: Arc::new(ctx) }
    }

    pub(crate) fn from_context(ctx: Arc<AccountContext>) -> Self {
        Self { ctx }
    }

    /// Account rooted at `location` with default settings.
    pub fn at(location: impl Into<PathBuf>) -> Self {
        Self::new(Config::with_location(location))
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn name(&self) -> &str {
        &self.ctx.config.account
    }

    pub fn blob_root(&self) -> &Path {
        &self.ctx.blob_root
    }

    pub fn queue_root(&self) -> &Path {
        &self.ctx.queue_root
    }

    pub fn container(&self, name: &str) -> StorageResult<ContainerEmulator> {
        validate_resource_name("Container", name)?;
        Ok(ContainerEmulator::new(self.ctx.clone(), name))
    }

    pub fn blob(&self, container: &str, name: &str) -> StorageResult<BlobEmulator> {
        validate_resource_name("Container", container)?;
        validate_blob_name(name)?;
        Ok(BlobEmulator::new(self.ctx.clone(), container, name))
    }

    pub fn queue(&self, name: &str) -> StorageResult<QueueEmulator> {
        validate_resource_name("Queue", name)?;
        Ok(QueueEmulator::new(self.ctx.clone(), name))
    }

    /// Resolves a blob URI into an emulator for that blob.
    ///
    /// Accepts the path-style service URI produced by
    /// [`BlobEmulator::uri`] (`http://host:port/account/container/name`) and
    /// `file://` URLs pointing below this account's blob root. URIs for any
    /// other account or root are rejected with
    /// `CopyAcrossAccountsNotSupported`.
    pub fn resolve_blob(&self, uri: &str) -> StorageResult<BlobEmulator> {
        let url = Url::parse(uri).map_err(|e| {
            StorageError::with_message(
                ErrorCode::InvalidSourceBlobUrl,
                format!("cannot parse blob URI '{}': {}", uri, e),
            )
        })?;

        let segments = match url.scheme() {
            "file" => self.file_segments(&url)?,
            "http" | "https" => self.endpoint_segments(&url)?,
            scheme => {
                return Err(StorageError::with_message(
                    ErrorCode::InvalidSourceBlobUrl,
                    format!("unsupported URI scheme '{}'", scheme),
                ))
            }
        };

        if segments.len() < 2 {
            return Err(StorageError::with_message(
                ErrorCode::InvalidSourceBlobUrl,
                format!("'{}' does not name a blob", uri),
            ));
        }
        self.blob(&segments[0], &segments[1..].join("/"))
    }

    fn file_segments(&self, url: &Url) -> StorageResult<Vec<String>> {
        let path = url
            .to_file_path()
            .map_err(|_| StorageError::new(ErrorCode::InvalidSourceBlobUrl))?;
        let relative = path.strip_prefix(&self.ctx.blob_root).map_err(|_| {
            StorageError::with_message(
                ErrorCode::CopyAcrossAccountsNotSupported,
                format!(
                    "{} is outside the blob root {}",
                    path.display(),
                    self.ctx.blob_root.display()
                ),
            )
        })?;
        Ok(relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect())
    }

    fn endpoint_segments(&self, url: &Url) -> StorageResult<Vec<String>> {
        let endpoint = Url::parse(&self.ctx.config.blob_endpoint())
            .map_err(|e| StorageError::with_message(ErrorCode::InternalError, e.to_string()))?;
        if url.origin() != endpoint.origin() {
            return Err(StorageError::with_message(
                ErrorCode::CopyAcrossAccountsNotSupported,
                format!("{} is not served by this emulator", url),
            ));
        }

        let mut segments: Vec<String> = url
            .path_segments()
            .into_iter()
            .flatten()
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect();
        if segments.first().map(String::as_str) != Some(self.name()) {
            return Err(StorageError::with_message(
                ErrorCode::CopyAcrossAccountsNotSupported,
                format!("{} belongs to a different account", url),
            ));
        }
        segments.remove(0);
        Ok(segments)
    }

    /// Names of containers that currently exist.
    pub async fn list_containers(&self) -> StorageResult<Vec<String>> {
        list_dirs(&self.ctx.blob_root).await
    }

    /// Names of queues that currently exist.
    pub async fn list_queues(&self) -> StorageResult<Vec<String>> {
        list_dirs(&self.ctx.queue_root).await
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

async fn list_dirs(root: &Path) -> StorageResult<Vec<String>> {
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(StorageError::from_io(err, root)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::from_io(e, root))?
    {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if is_dir {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Container and queue names: 3-63 characters, lowercase letters, digits
/// and single hyphens, starting with a letter or digit.
pub fn validate_resource_name(kind: &str, name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| {
        Err(StorageError::with_message(
            ErrorCode::InvalidResourceName,
            format!("{} name '{}' {}", kind, name, reason),
        ))
    };

    if name.len() < 3 || name.len() > 63 {
        return invalid("must be between 3 and 63 characters");
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return invalid("must start with a letter or number");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return invalid("can only contain lowercase letters, numbers, and hyphens");
    }
    if name.contains("--") {
        return invalid("cannot have consecutive hyphens");
    }
    Ok(())
}

/// Blob names are `/`-separated paths that must stay inside their container.
pub fn validate_blob_name(name: &str) -> StorageResult<()> {
    let invalid = |reason: &str| {
        Err(StorageError::with_message(
            ErrorCode::InvalidResourceName,
            format!("Blob name '{}' {}", name, reason),
        ))
    };

    if name.is_empty() || name.len() > 1024 {
        return invalid("must be between 1 and 1024 characters");
    }
    if name.contains('\\') || name.contains('\0') {
        return invalid("cannot contain backslashes or NUL");
    }
    for (i, segment) in name.split('/').enumerate() {
        if segment.is_empty() || segment == "." || segment == ".." {
            return invalid("has an empty or relative path segment");
        }
        if i == 0 && segment == METADATA_DIR {
            return invalid("uses a reserved prefix");
        }
    }
    // Catches drive prefixes and the like on Windows.
    if Path::new(name)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return invalid("is not a relative path");
    }
    Ok(())
}

/// Maps a `/`-separated blob name onto `base`.
pub(crate) fn name_to_path(base: &Path, name: &str) -> PathBuf {
    name.split('/').fold(base.to_path_buf(), |path, segment| path.join(segment))
}
