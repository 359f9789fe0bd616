use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::{repository::RepositoryError, storage::StorageError, validation::ValidationError};

/// Failure of a catalog command, before it is mapped to HTTP.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repository(RepositoryError),
    #[error("document {0} not found")]
    NotFound(Uuid),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for CatalogError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound(id) => CatalogError::NotFound(id),
            RepositoryError::Conflict(message) => CatalogError::Conflict(message),
            other => CatalogError::Repository(other),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Internal detail attached to an error response. Only rendered into the
/// body when the server runs in development mode.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    rule: Option<&'static str>,
    detail: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            rule: None,
            detail: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "resource not found")
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal server error",
        )
        .with_detail(error.to_string())
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl From<CatalogError> for AppError {
    fn from(value: CatalogError) -> Self {
        match value {
            CatalogError::Validation(err) => {
                let mut app = AppError::new(StatusCode::BAD_REQUEST, "validation", err.to_string());
                app.rule = Some(err.rule());
                app
            }
            CatalogError::NotFound(id) => AppError::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("document {id} not found"),
            ),
            CatalogError::Conflict(message) => AppError::new(
                StatusCode::CONFLICT,
                "conflict",
                "document conflicts with an existing record",
            )
            .with_detail(message),
            CatalogError::Storage(err) => AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage",
                "file storage is unavailable, please try again",
            )
            .with_detail(err.to_string()),
            CatalogError::Repository(err) => AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "repository",
                "catalog database is unavailable, please try again",
            )
            .with_detail(err.to_string()),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(value: ValidationError) -> Self {
        CatalogError::from(value).into()
    }
}

impl From<RepositoryError> for AppError {
    fn from(value: RepositoryError) -> Self {
        CatalogError::from(value).into()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(
                status = %self.status,
                kind = self.kind,
                detail = self.detail.as_deref().unwrap_or_default(),
                "request failed"
            );
        }

        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            kind: self.kind,
            rule: self.rule,
            detail: None,
        });
        let mut response = (status, body).into_response();
        if let Some(detail) = self.detail {
            response.extensions_mut().insert(ErrorDetail(detail));
        }
        response
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
