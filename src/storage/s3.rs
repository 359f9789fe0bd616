use std::error::Error as StdError;
use std::fmt::Debug;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream,
    Client as S3Client,
};
use bytes::Bytes;
use tracing::debug;

use super::{
    content_type_for_key, object_key, public_url, ObjectStore, RemoveOutcome, StorageError,
    StoragePurpose, StoredObject,
};
use crate::config::AppConfig;

pub struct S3Storage {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

impl S3Storage {
    pub fn new(
        client: S3Client,
        bucket: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let bucket = config
            .s3_bucket
            .clone()
            .context("S3_BUCKET must be set when STORAGE_BACKEND=s3")?;
        let client = build_client(config).await?;
        let public_base_url = config
            .storage_public_base_url
            .clone()
            .unwrap_or_else(|| default_public_base_url(config, &bucket));
        Ok(Self::new(client, bucket, public_base_url))
    }
}

pub async fn build_client(config: &AppConfig) -> Result<S3Client> {
    let region_provider = RegionProviderChain::first_try(Some(Region::new(
        config.aws_region.clone(),
    )))
    .or_default_provider()
    .or_else("us-east-1");

    #[allow(deprecated)]
    let mut loader = aws_config::from_env().region(region_provider);

    if let Some(endpoint) = config.aws_endpoint_url.as_deref() {
        loader = loader.endpoint_url(endpoint);
    }

    if let (Some(access_key), Some(secret_key)) = (
        config.aws_access_key_id.as_deref(),
        config.aws_secret_access_key.as_deref(),
    ) {
        loader = loader.credentials_provider(Credentials::new(
            access_key, secret_key, None, None, "config",
        ));
    }

    let shared = loader.load().await;
    let s3_config = S3ConfigBuilder::from(&shared).force_path_style(true).build();
    Ok(S3Client::from_conf(s3_config))
}

fn default_public_base_url(config: &AppConfig, bucket: &str) -> String {
    match config.aws_endpoint_url.as_deref() {
        Some(endpoint) => public_url(endpoint, bucket),
        None => format!("https://{bucket}.s3.{}.amazonaws.com", config.aws_region),
    }
}

fn inline_content_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "inline; filename=\"{sanitized}\"; filename*=UTF-8''{encoded}"
    ))
}

/// Transport-level SDK failures are worth one more try; anything the
/// service answered is not.
fn classify<E, R>(action: &str, err: SdkError<E, R>) -> StorageError
where
    E: StdError + 'static,
    R: Debug,
{
    let message = format!("{action}: {}", DisplayErrorContext(&err));
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageError::Transport(message)
        }
        _ => StorageError::Rejected(message),
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    async fn store(
        &self,
        bytes: Bytes,
        suggested_name: &str,
        purpose: StoragePurpose,
    ) -> Result<StoredObject, StorageError> {
        let key = object_key(purpose, suggested_name);
        let size = bytes.len();

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type_for_key(&key))
            .body(ByteStream::from(bytes));

        if purpose == StoragePurpose::Document {
            if let Some(disposition) = inline_content_disposition(suggested_name) {
                request = request.content_disposition(disposition);
            }
        }

        request
            .send()
            .await
            .map_err(|err| classify("failed to upload object to S3", err))?;

        debug!(bucket = %self.bucket, key = %key, size, "stored object in S3");
        Ok(StoredObject {
            url: public_url(&self.public_base_url, &key),
            storage_id: key,
        })
    }

    async fn remove(&self, storage_id: &str) -> Result<RemoveOutcome, StorageError> {
        // S3 deletes are silent for missing keys, so check first.
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(storage_id)
            .send()
            .await;

        if let Err(err) = head {
            let missing = err
                .as_service_error()
                .map(|service| service.is_not_found())
                .unwrap_or(false);
            if missing {
                return Ok(RemoveOutcome::NotFound);
            }
            return Err(classify("failed to inspect object in S3", err));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(storage_id)
            .send()
            .await
            .map_err(|err| classify("failed to delete object from S3", err))?;

        Ok(RemoveOutcome::Removed)
    }
}
