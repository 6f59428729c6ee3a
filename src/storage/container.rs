//! Blob container backed by a directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::info;

use super::account::{name_to_path, validate_blob_name, AccountContext, METADATA_DIR};
use super::blob::BlobEmulator;
use crate::auth::{generate_sas_token, SignedResource};
use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{BlobSasPermissions, SharedAccessPolicy};

/// One container: `<blob-root>/<name>`.
#[derive(Debug, Clone)]
pub struct ContainerEmulator {
    ctx: Arc<AccountContext>,
    name: String,
    path: PathBuf,
}

impl ContainerEmulator {
    pub(crate) fn new(ctx: Arc<AccountContext>, name: &str) -> Self {
        let path = ctx.blob_root.join(name);
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
        format!("{}/{}", self.ctx.config.blob_endpoint(), self.name)
    }

    /// Emulator for a blob in this container. Does not touch the filesystem.
    pub fn blob(&self, name: &str) -> StorageResult<BlobEmulator> {
        validate_blob_name(name)?;
        Ok(BlobEmulator::new(self.ctx.clone(), &self.name, name))
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Creates the container, failing if it already exists.
    pub async fn create(&self) -> StorageResult<()> {
        if self.exists().await {
            return Err(StorageError::new(ErrorCode::ContainerAlreadyExists).with_path(&self.path));
        }
        self.create_if_not_exists().await.map(|_| ())
    }

    /// Creates the container directory. Returns whether it was created.
    pub async fn create_if_not_exists(&self) -> StorageResult<bool> {
        if self.exists().await {
            return Ok(false);
        }
        fs::create_dir_all(&self.path)
            .await
            .map_err(|e| StorageError::from_io(e, &self.path))?;
        info!(container = %self.name, "created container");
        Ok(true)
    }

    /// Removes the container with every blob and metadata file in it.
    pub async fn delete(&self) -> StorageResult<()> {
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                info!(container = %self.name, "deleted container");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StorageError::new(
                ErrorCode::ContainerNotFound,
            )
            .with_path(&self.path)),
            Err(err) => Err(StorageError::from_io(err, &self.path)),
        }
    }

    pub async fn delete_if_exists(&self) -> StorageResult<bool> {
        match self.delete().await {
            Ok(()) => Ok(true),
            Err(err) if err.code == ErrorCode::ContainerNotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Blob names in this container, sorted, optionally filtered by prefix.
    pub async fn list_blobs(&self, prefix: Option<&str>) -> StorageResult<Vec<String>> {
        if !self.exists().await {
            return Err(StorageError::new(ErrorCode::ContainerNotFound).with_path(&self.path));
        }

        let mut names = Vec::new();
        let mut pending = vec![(self.path.clone(), String::new())];
        while let Some((dir, relative)) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // Removed by a concurrent delete.
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::from_io(err, &dir)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::from_io(e, &dir))?
            {
                let file_name = entry.file_name().to_string_lossy().into_owned();
                if relative.is_empty() && file_name == METADATA_DIR {
                    continue;
                }
                let name = if relative.is_empty() {
                    file_name
                } else {
                    format!("{}/{}", relative, file_name)
                };

                let file_type = match entry.file_type().await {
                    Ok(file_type) => file_type,
                    Err(_) => continue,
                };
                if file_type.is_dir() {
                    pending.push((entry.path(), name));
                } else if prefix.map_or(true, |p| name.starts_with(p)) {
                    names.push(name);
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Path a blob's content would live at.
    pub fn content_path(&self, blob: &str) -> PathBuf {
        name_to_path(&self.path, blob)
    }

    /// Access-signature token scoped to the whole container.
    pub fn get_shared_access_signature(
        &self,
        permissions: BlobSasPermissions,
        policy: &SharedAccessPolicy,
    ) -> String {
        generate_sas_token(
            &self.ctx.settings().sas_version,
            SignedResource::Container,
            &permissions.as_code(),
            policy,
            &format!("/blob/{}/{}", self.ctx.config.account, self.name),
        )
    }
}
