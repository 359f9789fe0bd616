use std::collections::HashMap;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, QueryRejection},
        Multipart, Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    document::{
        ClassLevel, CounterField, Document, DocumentFilter, DocumentQuery, PageRequest,
        SortOrder, Subject, DEFAULT_PAGE_SIZE,
    },
    error::{AppError, AppResult, CatalogError},
    state::AppState,
    validation::{
        parse_class_level, parse_subject, validate_patch, UploadCandidate, UploadedFile,
        ValidationError,
    },
};

const FILE_FIELDS: &[&str] = &["file", "pdf"];

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub subject: Subject,
    pub class_level: ClassLevel,
    pub file_url: String,
    pub thumbnail_url: String,
    pub file_size_bytes: i64,
    pub original_filename: String,
    pub pinned: bool,
    pub view_count: i64,
    pub download_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        Self {
            id: document.id,
            title: document.title,
            description: document.description,
            subject: document.subject,
            class_level: document.class_level,
            file_url: document.file_url,
            thumbnail_url: document.thumbnail_url,
            file_size_bytes: document.file_size_bytes,
            original_filename: document.original_filename,
            pinned: document.pinned,
            view_count: document.view_count,
            download_count: document.download_count,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginationResponse {
    pub page: u32,
    pub page_size: u32,
    pub total_items: i64,
    pub total_pages: i64,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentResponse>,
    pub pagination: PaginationResponse,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub url: String,
    pub filename: String,
}

/// Everything arrives as text so malformed values produce the same JSON
/// validation errors as the rest of the API.
#[derive(Debug, Default, Deserialize)]
pub struct DocumentListQuery {
    pub subject: Option<String>,
    #[serde(alias = "class", alias = "classLevel")]
    pub class_level: Option<String>,
    pub search: Option<String>,
    pub pinned: Option<String>,
    pub sort: Option<String>,
    pub page: Option<String>,
    #[serde(alias = "limit")]
    pub page_size: Option<String>,
}

impl DocumentListQuery {
    fn into_query(self) -> AppResult<DocumentQuery> {
        let subject = non_blank(self.subject.as_deref())
            .map(parse_subject)
            .transpose()?;
        let class_level = non_blank(self.class_level.as_deref())
            .map(parse_class_level)
            .transpose()?;
        let pinned = non_blank(self.pinned.as_deref())
            .map(|raw| match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(ValidationError::InvalidPinned {
                    value: raw.to_string(),
                }),
            })
            .transpose()?;
        let sort = match non_blank(self.sort.as_deref()) {
            Some(raw) => raw.parse::<SortOrder>().map_err(|value| {
                AppError::bad_request(format!(
                    "sort must be one of default, newest, oldest, title, popular (received '{value}')"
                ))
            })?,
            None => SortOrder::Default,
        };
        let page = parse_positive("page", self.page.as_deref())?.unwrap_or(1);
        let page_size =
            parse_positive("page_size", self.page_size.as_deref())?.unwrap_or(DEFAULT_PAGE_SIZE);

        Ok(DocumentQuery {
            filter: DocumentFilter {
                subject,
                class_level,
                search: non_blank(self.search.as_deref()).map(str::to_string),
                pinned,
            },
            sort,
            page: PageRequest::new(page, page_size),
        })
    }
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|value| !value.is_empty())
}

fn parse_positive(name: &str, raw: Option<&str>) -> AppResult<Option<u32>> {
    non_blank(raw)
        .map(|value| {
            value.parse::<u32>().map_err(|_| {
                AppError::bad_request(format!(
                    "{name} must be a positive integer (received '{value}')"
                ))
            })
        })
        .transpose()
}

fn parse_document_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::bad_request(format!("'{raw}' is not a valid document id")))
}

// A body cut off by the request limit is an oversized file, reported like
// any other upload rule.
fn multipart_error(err: MultipartError, max_file_bytes: u64) -> AppError {
    let status = err.status();
    warn!(error = %err, %status, "invalid multipart data");
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        let err = CatalogError::from(ValidationError::UploadTooLarge {
            limit: max_file_bytes,
        });
        log_rejection("upload", &err);
        AppError::from(err)
    } else {
        AppError::bad_request(format!("invalid multipart data: {}", err.body_text()))
    }
}

fn multipart_rejection(rejection: MultipartRejection) -> AppError {
    AppError::bad_request(format!(
        "expected a multipart/form-data body: {}",
        rejection.body_text()
    ))
}

async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
    max_file_bytes: u64,
) -> AppResult<UploadCandidate> {
    let mut multipart = multipart.map_err(multipart_rejection)?;
    let read_error = |err: MultipartError| multipart_error(err, max_file_bytes);
    let mut file: Option<UploadedFile> = None;
    let mut fields: HashMap<String, String> = HashMap::new();

    while let Some(field) = multipart.next_field().await.map_err(read_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if FILE_FIELDS.contains(&name.as_str()) {
            let original_filename = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await.map_err(read_error)?;
            file = Some(UploadedFile {
                bytes,
                content_type,
                original_filename,
            });
        } else {
            let value = field.text().await.map_err(read_error)?;
            fields.insert(name, value);
        }
    }

    Ok(UploadCandidate { file, fields })
}

/// `<title>.pdf` with path separators, quotes and control characters
/// replaced so clients can use it as a file name directly.
fn download_filename(title: &str) -> String {
    let sanitized: String = title
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | '"' | ':' | '*' | '?' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect();
    let stem = sanitized.trim().trim_matches('.');
    if stem.is_empty() {
        "document.pdf".to_string()
    } else {
        format!("{stem}.pdf")
    }
}

fn log_rejection(action: &'static str, err: &CatalogError) {
    if let CatalogError::Validation(validation) = err {
        info!(action, rule = validation.rule(), reason = %validation, "request rejected");
    }
}

pub async fn upload_document(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    let candidate = read_upload(multipart, state.pipeline.limits().max_file_bytes).await?;

    // Detached so a client disconnect cannot interrupt cleanup.
    let pipeline = state.pipeline.clone();
    let outcome = tokio::spawn(async move { pipeline.ingest(candidate).await })
        .await
        .map_err(AppError::internal)?;

    let document = outcome.map_err(|err| {
        log_rejection("upload", &err);
        AppError::from(err)
    })?;

    Ok((StatusCode::CREATED, Json(document.into())))
}

pub async fn list_documents(
    State(state): State<AppState>,
    params: Result<Query<DocumentListQuery>, QueryRejection>,
) -> AppResult<Json<DocumentListResponse>> {
    let Query(params) = params.map_err(|err| AppError::bad_request(err.body_text()))?;
    let query = params.into_query()?;
    let page = state.documents.find(&query).await?;

    let pagination = PaginationResponse {
        page: page.request.page(),
        page_size: page.request.page_size(),
        total_items: page.total,
        total_pages: page.total_pages(),
        has_more: page.has_more(),
    };

    Ok(Json(DocumentListResponse {
        documents: page.items.into_iter().map(Into::into).collect(),
        pagination,
    }))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DocumentResponse>> {
    let id = parse_document_id(&id)?;
    let document = state.documents.find_by_id(id).await?;
    Ok(Json(document.into()))
}

pub async fn update_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> AppResult<Json<DocumentResponse>> {
    let id = parse_document_id(&id)?;
    let Json(body) = body.map_err(|err| AppError::bad_request(err.body_text()))?;
    let fields = body
        .as_object()
        .ok_or_else(|| AppError::bad_request("request body must be a JSON object"))?;

    let patch = validate_patch(fields).map_err(|err| {
        let err = CatalogError::from(err);
        log_rejection("update", &err);
        AppError::from(err)
    })?;

    let document = state.documents.update(id, patch).await?;
    info!(document_id = %id, "document metadata updated");
    Ok(Json(document.into()))
}

pub async fn replace_document_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<DocumentResponse>> {
    let id = parse_document_id(&id)?;
    let candidate = read_upload(multipart, state.pipeline.limits().max_file_bytes).await?;

    let pipeline = state.pipeline.clone();
    let outcome = tokio::spawn(async move { pipeline.replace_file(id, candidate.file).await })
        .await
        .map_err(AppError::internal)?;

    let document = outcome.map_err(|err| {
        log_rejection("replace_file", &err);
        AppError::from(err)
    })?;
    Ok(Json(document.into()))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_document_id(&id)?;

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move { pipeline.delete(id).await })
        .await
        .map_err(AppError::internal)??;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_pinned(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DocumentResponse>> {
    let id = parse_document_id(&id)?;
    let document = state.documents.toggle_pinned(id).await?;
    info!(document_id = %id, pinned = document.pinned, "document pin toggled");
    Ok(Json(document.into()))
}

pub async fn record_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DocumentResponse>> {
    let id = parse_document_id(&id)?;
    let document = state
        .documents
        .increment_counter(id, CounterField::Views)
        .await?;
    Ok(Json(document.into()))
}

pub async fn record_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DownloadResponse>> {
    let id = parse_document_id(&id)?;
    let document = state
        .documents
        .increment_counter(id, CounterField::Downloads)
        .await?;

    Ok(Json(DownloadResponse {
        filename: download_filename(&document.title),
        url: document.file_url,
    }))
}
