#![allow(dead_code)]

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use bytes::Bytes;
use chrono::{NaiveDateTime, Utc};
use diesel::connection::SimpleConnection;
use http_body_util::BodyExt;
use notes_catalog::config::{AppConfig, StorageBackend};
use notes_catalog::db::{self, PgPool};
use notes_catalog::document::{
    CatalogStats, ClassLevel, CounterField, Document, DocumentFilter, DocumentPatch,
    DocumentQuery, FileReplacement, NewDocument, Page, SortOrder, Subject, SupersededObjects,
};
use notes_catalog::repository::{DocumentRepository, PgDocumentRepository, RepositoryError};
use notes_catalog::routes;
use notes_catalog::state::AppState;
use notes_catalog::storage::{
    object_key, ObjectStore, RasterizeError, RemoveOutcome, StorageError, StoragePurpose,
    StoredObject,
};
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-thumbnail";

/// In-memory object store with switches for injecting failures.
#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    removed: Mutex<Vec<String>>,
    store_calls: AtomicUsize,
    transient_document_failures: AtomicUsize,
    fail_thumbnail_store: AtomicBool,
    fail_png_thumbnail_store: AtomicBool,
    fail_rasterize: AtomicBool,
    fail_remove: AtomicBool,
    hang_document_store: AtomicBool,
    hang_rasterize: AtomicBool,
}

/// Longer than any call timeout used in tests.
const HANG: Duration = Duration::from_secs(3600);

#[async_trait]
impl ObjectStore for FakeStorage {
    async fn store(
        &self,
        bytes: Bytes,
        suggested_name: &str,
        purpose: StoragePurpose,
    ) -> Result<StoredObject, StorageError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);

        match purpose {
            StoragePurpose::Document => {
                if self.hang_document_store.load(Ordering::SeqCst) {
                    tokio::time::sleep(HANG).await;
                }
                let remaining = self.transient_document_failures.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.transient_document_failures
                        .store(remaining - 1, Ordering::SeqCst);
                    return Err(StorageError::Transport("connection reset".into()));
                }
            }
            StoragePurpose::Thumbnail => {
                if self.fail_thumbnail_store.load(Ordering::SeqCst) {
                    return Err(StorageError::Rejected("thumbnail folder unavailable".into()));
                }
                if suggested_name.ends_with(".png")
                    && self.fail_png_thumbnail_store.load(Ordering::SeqCst)
                {
                    return Err(StorageError::Rejected("png rejected".into()));
                }
            }
        }

        let key = object_key(purpose, suggested_name);
        self.objects
            .lock()
            .await
            .insert(key.clone(), bytes.to_vec());
        Ok(StoredObject {
            url: format!("https://fake-storage/{key}"),
            storage_id: key,
        })
    }

    async fn remove(&self, storage_id: &str) -> Result<RemoveOutcome, StorageError> {
        self.removed.lock().await.push(storage_id.to_string());
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(StorageError::Transport("remove timed out".into()));
        }
        match self.objects.lock().await.remove(storage_id) {
            Some(_) => Ok(RemoveOutcome::Removed),
            None => Ok(RemoveOutcome::NotFound),
        }
    }

    async fn rasterize_first_page(&self, _pdf: Bytes) -> Result<Vec<u8>, RasterizeError> {
        if self.hang_rasterize.load(Ordering::SeqCst) {
            tokio::time::sleep(HANG).await;
        }
        if self.fail_rasterize.load(Ordering::SeqCst) {
            return Err(RasterizeError::Unsupported("no converter".into()));
        }
        Ok(FAKE_PNG.to_vec())
    }
}

impl FakeStorage {
    pub async fn get(&self, storage_id: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(storage_id).cloned()
    }

    pub async fn contains(&self, storage_id: &str) -> bool {
        self.objects.lock().await.contains_key(storage_id)
    }

    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn removed(&self) -> Vec<String> {
        self.removed.lock().await.clone()
    }

    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_document_stores(&self, count: usize) {
        self.transient_document_failures
            .store(count, Ordering::SeqCst);
    }

    pub fn fail_thumbnail_store(&self, fail: bool) {
        self.fail_thumbnail_store.store(fail, Ordering::SeqCst);
    }

    pub fn fail_png_thumbnail_store(&self, fail: bool) {
        self.fail_png_thumbnail_store.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rasterize(&self, fail: bool) {
        self.fail_rasterize.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    pub fn hang_document_store(&self, hang: bool) {
        self.hang_document_store.store(hang, Ordering::SeqCst);
    }

    pub fn hang_rasterize(&self, hang: bool) {
        self.hang_rasterize.store(hang, Ordering::SeqCst);
    }
}

/// Repository double mirroring the Postgres semantics, including the sort
/// orders and the unique storage id.
#[derive(Default)]
pub struct MemoryRepository {
    documents: Mutex<HashMap<Uuid, Document>>,
    unavailable: AtomicBool,
}

impl MemoryRepository {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.documents.lock().await.len()
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

fn advance(previous: NaiveDateTime) -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}

fn matches_filter(document: &Document, filter: &DocumentFilter) -> bool {
    if filter.subject.is_some_and(|subject| subject != document.subject) {
        return false;
    }
    if filter
        .class_level
        .is_some_and(|class_level| class_level != document.class_level)
    {
        return false;
    }
    if filter.pinned.is_some_and(|pinned| pinned != document.pinned) {
        return false;
    }
    if let Some(search) = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|search| !search.is_empty())
    {
        let needle = search.to_lowercase();
        let in_title = document.title.to_lowercase().contains(&needle);
        let in_description = document
            .description
            .as_deref()
            .is_some_and(|text| text.to_lowercase().contains(&needle));
        if !in_title && !in_description {
            return false;
        }
    }
    true
}

pub fn compare_documents(sort: SortOrder, a: &Document, b: &Document) -> CmpOrdering {
    match sort {
        SortOrder::Default => b
            .pinned
            .cmp(&a.pinned)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| b.id.cmp(&a.id)),
        SortOrder::Newest => b
            .created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id)),
        SortOrder::Oldest => a
            .created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id)),
        SortOrder::Title => a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)),
        SortOrder::Popular => b
            .view_count
            .cmp(&a.view_count)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| b.id.cmp(&a.id)),
    }
}

#[async_trait]
impl DocumentRepository for MemoryRepository {
    async fn insert(&self, document: NewDocument) -> Result<Document, RepositoryError> {
        self.check_available()?;
        let mut guard = self.documents.lock().await;
        if guard
            .values()
            .any(|existing| existing.storage_file_id == document.storage_file_id)
        {
            return Err(RepositoryError::Conflict(format!(
                "storage id {} already referenced",
                document.storage_file_id
            )));
        }

        let now = Utc::now().naive_utc();
        let created = Document {
            id: Uuid::new_v4(),
            title: document.title,
            description: document.description,
            subject: document.subject,
            class_level: document.class_level,
            file_url: document.file_url,
            thumbnail_url: document.thumbnail_url,
            storage_file_id: document.storage_file_id,
            thumbnail_storage_id: document.thumbnail_storage_id,
            file_size_bytes: document.file_size_bytes,
            original_filename: document.original_filename,
            pinned: document.pinned,
            view_count: 0,
            download_count: 0,
            created_at: now,
            updated_at: now,
        };
        guard.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find(&self, query: &DocumentQuery) -> Result<Page<Document>, RepositoryError> {
        self.check_available()?;
        let guard = self.documents.lock().await;
        let mut matching: Vec<Document> = guard
            .values()
            .filter(|document| matches_filter(document, &query.filter))
            .cloned()
            .collect();
        matching.sort_by(|a, b| compare_documents(query.sort, a, b));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(query.page.offset() as usize)
            .take(query.page.limit() as usize)
            .collect();
        Ok(Page {
            items,
            total,
            request: query.page,
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Document, RepositoryError> {
        self.check_available()?;
        self.documents
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound(id))
    }

    async fn update(&self, id: Uuid, patch: DocumentPatch) -> Result<Document, RepositoryError> {
        self.check_available()?;
        let mut guard = self.documents.lock().await;
        let document = guard.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;

        if let Some(title) = patch.title {
            document.title = title;
        }
        if let Some(description) = patch.description {
            document.description = description;
        }
        if let Some(subject) = patch.subject {
            document.subject = subject;
        }
        if let Some(class_level) = patch.class_level {
            document.class_level = class_level;
        }
        if let Some(pinned) = patch.pinned {
            document.pinned = pinned;
        }
        document.updated_at = advance(document.updated_at);
        Ok(document.clone())
    }

    async fn replace_file(
        &self,
        id: Uuid,
        file: FileReplacement,
    ) -> Result<(Document, SupersededObjects), RepositoryError> {
        self.check_available()?;
        let mut guard = self.documents.lock().await;
        let document = guard.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;

        let superseded = SupersededObjects {
            storage_file_id: std::mem::replace(&mut document.storage_file_id, file.storage_file_id),
            thumbnail_storage_id: std::mem::replace(
                &mut document.thumbnail_storage_id,
                file.thumbnail_storage_id,
            ),
        };
        document.file_url = file.file_url;
        document.thumbnail_url = file.thumbnail_url;
        document.file_size_bytes = file.file_size_bytes;
        document.original_filename = file.original_filename;
        document.updated_at = advance(document.updated_at);
        Ok((document.clone(), superseded))
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.check_available()?;
        self.documents
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound(id))
    }

    async fn increment_counter(
        &self,
        id: Uuid,
        field: CounterField,
    ) -> Result<Document, RepositoryError> {
        self.check_available()?;
        let mut guard = self.documents.lock().await;
        let document = guard.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        match field {
            CounterField::Views => document.view_count += 1,
            CounterField::Downloads => document.download_count += 1,
        }
        Ok(document.clone())
    }

    async fn toggle_pinned(&self, id: Uuid) -> Result<Document, RepositoryError> {
        self.check_available()?;
        let mut guard = self.documents.lock().await;
        let document = guard.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        document.pinned = !document.pinned;
        document.updated_at = advance(document.updated_at);
        Ok(document.clone())
    }

    async fn aggregate_stats(&self) -> Result<CatalogStats, RepositoryError> {
        self.check_available()?;
        let guard = self.documents.lock().await;

        let mut by_subject: HashMap<Subject, i64> = HashMap::new();
        let mut by_class: HashMap<ClassLevel, i64> = HashMap::new();
        let mut stats = CatalogStats::default();
        for document in guard.values() {
            stats.total_documents += 1;
            stats.pinned_documents += i64::from(document.pinned);
            stats.total_views += document.view_count;
            stats.total_downloads += document.download_count;
            *by_subject.entry(document.subject).or_default() += 1;
            *by_class.entry(document.class_level).or_default() += 1;
        }

        stats.by_subject = by_subject.into_iter().collect();
        stats
            .by_subject
            .sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        stats.by_class = by_class.into_iter().collect();
        stats.by_class.sort();
        Ok(stats)
    }

    async fn class_levels(&self) -> Result<Vec<ClassLevel>, RepositoryError> {
        self.check_available()?;
        let guard = self.documents.lock().await;
        let mut levels: Vec<ClassLevel> = guard.values().map(|document| document.class_level).collect();
        levels.sort();
        levels.dedup();
        Ok(levels)
    }

    async fn subjects(
        &self,
        class_level: Option<ClassLevel>,
    ) -> Result<Vec<Subject>, RepositoryError> {
        self.check_available()?;
        let guard = self.documents.lock().await;
        let mut subjects: Vec<Subject> = guard
            .values()
            .filter(|document| class_level.map_or(true, |level| level == document.class_level))
            .map(|document| document.subject)
            .collect();
        subjects.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        subjects.dedup();
        Ok(subjects)
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused@localhost/notes".to_string(),
        database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        cors_allowed_origin: None,
        storage_backend: StorageBackend::S3,
        aws_endpoint_url: None,
        aws_access_key_id: None,
        aws_secret_access_key: None,
        aws_region: "us-east-1".to_string(),
        s3_bucket: Some("test-bucket".to_string()),
        storage_public_base_url: None,
        storage_root: PathBuf::from("./unused"),
        max_upload_bytes: 4 * 1024 * 1024,
        external_call_timeout: Duration::from_secs(5),
        expose_error_details: false,
    }
}

pub fn new_document(title: &str, subject: Subject, class_level: i64) -> NewDocument {
    let key = Uuid::new_v4();
    NewDocument {
        title: title.to_string(),
        description: None,
        subject,
        class_level: ClassLevel::new(class_level).expect("class level in range"),
        file_url: format!("https://fake-storage/pdfs/{key}.pdf"),
        thumbnail_url: format!("https://fake-storage/pdfs/thumbnails/{key}.png"),
        storage_file_id: format!("pdfs/{key}.pdf"),
        thumbnail_storage_id: format!("pdfs/thumbnails/{key}.png"),
        file_size_bytes: 2048,
        original_filename: format!("{title}.pdf"),
        pinned: false,
    }
}

/// Minimal bytes that pass as a PDF upload.
pub fn pdf_bytes(size: usize) -> Vec<u8> {
    let mut bytes = b"%PDF-1.4\n".to_vec();
    bytes.resize(size.max(bytes.len()), b'0');
    bytes
}

pub struct FilePart<'a> {
    pub field: &'a str,
    pub filename: &'a str,
    pub content_type: &'a str,
    pub data: &'a [u8],
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    repository: Arc<MemoryRepository>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let storage = Arc::new(FakeStorage::default());
        let repository = Arc::new(MemoryRepository::default());
        let state = AppState::new(config, storage.clone(), repository.clone());
        let router = routes::create_router(state.clone());

        Self {
            state,
            router,
            storage,
            repository,
        }
    }

    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub fn repository(&self) -> Arc<MemoryRepository> {
        self.repository.clone()
    }

    pub async fn seed(&self, document: NewDocument) -> Result<Document> {
        Ok(self.repository.insert(document).await?)
    }

    pub async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())?;
        self.send(request).await
    }

    pub async fn post_empty(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Body::empty())?;
        self.send(request).await
    }

    pub async fn patch_empty(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::PATCH)
            .uri(path)
            .body(Body::empty())?;
        self.send(request).await
    }

    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let request = Request::builder()
            .method(Method::PATCH)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        self.send(request).await
    }

    pub async fn delete(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(path)
            .body(Body::empty())?;
        self.send(request).await
    }

    pub async fn multipart(
        &self,
        method: Method,
        path: &str,
        fields: &[(&str, &str)],
        file: Option<FilePart<'_>>,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();

        for (name, value) in fields {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }

        if let Some(file) = file {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    file.field, file.filename
                )
                .as_bytes(),
            );
            body.extend(format!("Content-Type: {}\r\n\r\n", file.content_type).as_bytes());
            body.extend(file.data);
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))?;
        self.send(request).await
    }

    pub async fn upload(
        &self,
        fields: &[(&str, &str)],
        file: Option<FilePart<'_>>,
    ) -> Result<hyper::Response<Body>> {
        self.multipart(Method::POST, "/api/documents", fields, file)
            .await
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn body_json(response: hyper::Response<Body>) -> Result<serde_json::Value> {
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).context("response body is not JSON")
}

/// Postgres-backed repository on a clean `documents` table, or `None` when
/// `TEST_DATABASE_URL` is not set.
pub async fn postgres_repository() -> Result<Option<PgDocumentRepository>> {
    let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
        return Ok(None);
    };

    let pool = db::init_pool_with_size(&database_url, 8)?;
    prepare_database(&pool).await?;
    Ok(Some(PgDocumentRepository::new(pool)))
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.batch_execute("TRUNCATE TABLE documents;")
            .context("failed to truncate documents")?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}
