use std::sync::Arc;

use crate::{
    config::AppConfig,
    pipeline::UploadPipeline,
    repository::DocumentRepository,
    storage::ObjectStore,
    thumbnail::ThumbnailDeriver,
    validation::UploadLimits,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub documents: Arc<dyn DocumentRepository>,
    pub pipeline: Arc<UploadPipeline>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentRepository>,
    ) -> Self {
        let limits = UploadLimits {
            max_file_bytes: config.max_upload_bytes,
        };
        let thumbnails = ThumbnailDeriver::new(storage.clone(), config.external_call_timeout);
        let pipeline = UploadPipeline::new(
            storage,
            documents.clone(),
            thumbnails,
            limits,
            config.external_call_timeout,
        );

        Self {
            config: Arc::new(config),
            documents,
            pipeline: Arc::new(pipeline),
        }
    }
}
