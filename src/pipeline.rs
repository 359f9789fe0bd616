//! Upload ingestion: validate, store the PDF, derive a thumbnail, persist
//! the record. A failure after anything has been stored removes what was
//! stored before the error is returned, so a record never points at a
//! missing object.

use std::{path::Path, sync::Arc, time::Duration};

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    document::{Document, FileReplacement, NewDocument},
    error::CatalogError,
    repository::DocumentRepository,
    storage::{with_timeout, ObjectStore, RemoveOutcome, StorageError, StoragePurpose, StoredObject},
    thumbnail::{DerivedThumbnail, ThumbnailDeriver, ThumbnailSource},
    validation::{validate_file, validate_upload, PdfFile, UploadCandidate, UploadLimits, UploadedFile},
};

const FALLBACK_BASE_NAME: &str = "document";

pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentRepository>,
    thumbnails: ThumbnailDeriver,
    limits: UploadLimits,
    call_timeout: Duration,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentRepository>,
        thumbnails: ThumbnailDeriver,
        limits: UploadLimits,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            documents,
            thumbnails,
            limits,
            call_timeout,
        }
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    pub async fn ingest(&self, candidate: UploadCandidate) -> Result<Document, CatalogError> {
        let command = validate_upload(candidate, &self.limits)?;
        let base_name = base_name(&command.file.original_filename);

        let stored_file = self.store_document(&command.file).await?;

        let thumbnail = match self
            .thumbnails
            .derive(&command.file.bytes, &command.title, &base_name)
            .await
        {
            Ok(thumbnail) => thumbnail,
            Err(err) => {
                error!(error = %err, "thumbnail storage failed; discarding uploaded file");
                self.discard(&[stored_file.storage_id.as_str()]).await;
                return Err(err.into());
            }
        };

        let file_size_bytes = command.file.size() as i64;
        let new_document = NewDocument {
            title: command.title,
            description: command.description,
            subject: command.subject,
            class_level: command.class_level,
            file_url: stored_file.url.clone(),
            thumbnail_url: thumbnail.object.url.clone(),
            storage_file_id: stored_file.storage_id.clone(),
            thumbnail_storage_id: thumbnail.object.storage_id.clone(),
            file_size_bytes,
            original_filename: command.file.original_filename,
            pinned: command.pinned,
        };

        match self.documents.insert(new_document).await {
            Ok(document) => {
                info!(
                    document_id = %document.id,
                    subject = %document.subject,
                    class_level = %document.class_level,
                    size = file_size_bytes,
                    placeholder = is_placeholder(&thumbnail),
                    "document uploaded"
                );
                Ok(document)
            }
            Err(err) => {
                error!(error = %err, "failed to persist document; discarding stored objects");
                self.discard(&[
                    stored_file.storage_id.as_str(),
                    thumbnail.object.storage_id.as_str(),
                ])
                .await;
                Err(err.into())
            }
        }
    }

    /// Swaps the PDF behind an existing document. The objects the record
    /// referenced at the moment of the swap are removed only once it points
    /// at the new ones.
    pub async fn replace_file(
        &self,
        id: Uuid,
        file: Option<UploadedFile>,
    ) -> Result<Document, CatalogError> {
        let file = validate_file(file, &self.limits)?;
        let existing = self.documents.find_by_id(id).await?;
        let base_name = base_name(&file.original_filename);

        let stored_file = self.store_document(&file).await?;

        let thumbnail = match self
            .thumbnails
            .derive(&file.bytes, &existing.title, &base_name)
            .await
        {
            Ok(thumbnail) => thumbnail,
            Err(err) => {
                error!(document_id = %id, error = %err, "thumbnail storage failed; discarding replacement file");
                self.discard(&[stored_file.storage_id.as_str()]).await;
                return Err(err.into());
            }
        };

        let replacement = FileReplacement {
            file_url: stored_file.url.clone(),
            thumbnail_url: thumbnail.object.url.clone(),
            storage_file_id: stored_file.storage_id.clone(),
            thumbnail_storage_id: thumbnail.object.storage_id.clone(),
            file_size_bytes: file.size() as i64,
            original_filename: file.original_filename.clone(),
        };

        match self.documents.replace_file(id, replacement).await {
            Ok((updated, superseded)) => {
                info!(document_id = %id, size = file.size(), "document file replaced");
                self.discard(&[
                    superseded.storage_file_id.as_str(),
                    superseded.thumbnail_storage_id.as_str(),
                ])
                .await;
                Ok(updated)
            }
            Err(err) => {
                error!(document_id = %id, error = %err, "failed to record replacement file; discarding it");
                self.discard(&[
                    stored_file.storage_id.as_str(),
                    thumbnail.object.storage_id.as_str(),
                ])
                .await;
                Err(err.into())
            }
        }
    }

    /// Object removal is best effort; the record is deleted regardless.
    pub async fn delete(&self, id: Uuid) -> Result<(), CatalogError> {
        let existing = self.documents.find_by_id(id).await?;

        self.discard(&[
            existing.storage_file_id.as_str(),
            existing.thumbnail_storage_id.as_str(),
        ])
        .await;

        self.documents.delete(id).await?;
        info!(document_id = %id, "document deleted");
        Ok(())
    }

    async fn store_document(&self, file: &PdfFile) -> Result<StoredObject, StorageError> {
        let attempt = || {
            with_timeout(
                self.call_timeout,
                self.store.store(
                    file.bytes.clone(),
                    &file.original_filename,
                    StoragePurpose::Document,
                ),
            )
        };

        match attempt().await {
            Err(err) if err.is_transient() => {
                warn!(error = %err, "document store failed; retrying once");
                attempt().await
            }
            result => result,
        }
    }

    async fn discard(&self, storage_ids: &[&str]) {
        let removals = storage_ids.iter().map(|storage_id| async move {
            let result = with_timeout(self.call_timeout, self.store.remove(storage_id)).await;
            (*storage_id, result)
        });

        for (storage_id, result) in join_all(removals).await {
            match result {
                Ok(RemoveOutcome::Removed) => debug!(storage_id, "removed stored object"),
                Ok(RemoveOutcome::NotFound) => {
                    warn!(storage_id, "stored object was already missing")
                }
                Err(err) => error!(storage_id, error = %err, "failed to remove stored object"),
            }
        }
    }
}

fn base_name(original_filename: &str) -> String {
    Path::new(original_filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::trim)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(FALLBACK_BASE_NAME)
        .to_string()
}

fn is_placeholder(thumbnail: &DerivedThumbnail) -> bool {
    matches!(thumbnail.source, ThumbnailSource::Placeholder { .. })
}
