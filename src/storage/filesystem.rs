use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

use super::{
    object_key, public_url, ObjectStore, RemoveOutcome, StorageError, StoragePurpose,
    StoredObject,
};

/// Stores objects beneath a local directory. The server exposes the same
/// directory read-only so the returned URLs resolve.
pub struct FilesystemStorage {
    root: PathBuf,
    public_base_url: String,
}

impl FilesystemStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys are relative paths made of plain segments only.
    fn resolve(&self, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        let plain = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        plain.then(|| self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FilesystemStorage {
    async fn store(
        &self,
        bytes: Bytes,
        suggested_name: &str,
        purpose: StoragePurpose,
    ) -> Result<StoredObject, StorageError> {
        let key = object_key(purpose, suggested_name);
        let path = self
            .resolve(&key)
            .ok_or_else(|| StorageError::Rejected(format!("invalid object key {key}")))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let tmp_path = path.with_extension("part");
        let write = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &path).await
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(io_error(err));
        }

        debug!(key = %key, size = bytes.len(), "stored object on disk");
        Ok(StoredObject {
            url: public_url(&self.public_base_url, &key),
            storage_id: key,
        })
    }

    async fn remove(&self, storage_id: &str) -> Result<RemoveOutcome, StorageError> {
        let Some(path) = self.resolve(storage_id) else {
            return Ok(RemoveOutcome::NotFound);
        };

        match fs::remove_file(&path).await {
            Ok(()) => Ok(RemoveOutcome::Removed),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RemoveOutcome::NotFound),
            Err(err) => Err(io_error(err)),
        }
    }
}

fn io_error(err: io::Error) -> StorageError {
    match err.kind() {
        ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
            StorageError::Transport(err.to_string())
        }
        _ => StorageError::Rejected(err.to_string()),
    }
}
