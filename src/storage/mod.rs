//! Object store capability: put bytes somewhere durable, remove them again,
//! and (best effort) rasterize the first page of a PDF.

use std::{
    future::Future,
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use bytes::Bytes;
use rand::RngCore;
use thiserror::Error;
use tokio::time::timeout;

use crate::render;

pub mod filesystem;
pub mod s3;

pub use filesystem::FilesystemStorage;
pub use s3::S3Storage;

const MAX_STEM_CHARS: usize = 64;
const RANDOM_TOKEN_BYTES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoragePurpose {
    Document,
    Thumbnail,
}

impl StoragePurpose {
    pub fn folder(&self) -> &'static str {
        match self {
            StoragePurpose::Document => "pdfs",
            StoragePurpose::Thumbnail => "pdfs/thumbnails",
        }
    }

    fn default_extension(&self) -> &'static str {
        match self {
            StoragePurpose::Document => "pdf",
            StoragePurpose::Thumbnail => "png",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub url: String,
    pub storage_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("object store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("object store unreachable: {0}")]
    Transport(String),
    #[error("object store rejected the request: {0}")]
    Rejected(String),
}

impl StorageError {
    /// Timeouts and transport failures may succeed when repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Timeout(_) | StorageError::Transport(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RasterizeError {
    #[error("format not supported: {0}")]
    Unsupported(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("rasterization timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Stores `bytes` under a fresh unique name derived from `suggested_name`.
    async fn store(
        &self,
        bytes: Bytes,
        suggested_name: &str,
        purpose: StoragePurpose,
    ) -> Result<StoredObject, StorageError>;

    /// Removing an unknown or already removed id reports `NotFound`.
    async fn remove(&self, storage_id: &str) -> Result<RemoveOutcome, StorageError>;

    /// Renders page one of a PDF to PNG. Backends without a server-side
    /// converter render locally.
    async fn rasterize_first_page(&self, pdf: Bytes) -> Result<Vec<u8>, RasterizeError> {
        render::rasterize_first_page(pdf).await
    }
}

/// Bounds an object store call; expiry is reported as that call's failure.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(limit)),
    }
}

/// `<stem>_<unix nanos>_<random hex>.<ext>`: concurrent calls with the same
/// suggested name still get distinct names.
pub fn unique_object_name(suggested_name: &str, purpose: StoragePurpose) -> String {
    let path = Path::new(suggested_name.trim());
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(sanitize_segment)
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "file".to_string());
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|ch| ch.is_ascii_alphanumeric()))
        .unwrap_or_else(|| purpose.default_extension().to_string());

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();

    let mut token = [0u8; RANDOM_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut token);

    format!("{stem}_{nanos}_{}.{extension}", hex::encode(token))
}

pub fn object_key(purpose: StoragePurpose, suggested_name: &str) -> String {
    format!(
        "{}/{}",
        purpose.folder(),
        unique_object_name(suggested_name, purpose)
    )
}

pub fn content_type_for_key(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

pub(crate) fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

fn sanitize_segment(raw: &str) -> String {
    let mut sanitized = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let mapped = if ch.is_ascii_alphanumeric() || ch == '-' {
            ch
        } else {
            '_'
        };
        if mapped == '_' && sanitized.ends_with('_') {
            continue;
        }
        sanitized.push(mapped);
        if sanitized.len() >= MAX_STEM_CHARS {
            break;
        }
    }
    sanitized.trim_matches('_').to_string()
}
