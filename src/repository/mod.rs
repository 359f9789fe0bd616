use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::document::{
    CatalogStats, ClassLevel, CounterField, Document, DocumentPatch, DocumentQuery,
    FileReplacement, NewDocument, Page, Subject, SupersededObjects,
};

pub mod postgres;

pub use postgres::PgDocumentRepository;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("document {0} not found")]
    NotFound(Uuid),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
    #[error("metadata query failed: {0}")]
    Query(String),
}

/// Persistence for the document catalog. Every operation is atomic per
/// document; none of them needs a read-modify-write cycle in the caller.
#[async_trait]
pub trait DocumentRepository: Send + Sync + 'static {
    /// Assigns the identifier and both timestamps.
    async fn insert(&self, document: NewDocument) -> Result<Document, RepositoryError>;

    async fn find(&self, query: &DocumentQuery) -> Result<Page<Document>, RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Document, RepositoryError>;

    /// Applies only the supplied fields and refreshes `updated_at`.
    async fn update(&self, id: Uuid, patch: DocumentPatch) -> Result<Document, RepositoryError>;

    /// Points the record at a new file and returns the storage ids it held
    /// until then. Both are read and written under one row lock, so
    /// concurrent replacements each see the ids the other one wrote.
    async fn replace_file(
        &self,
        id: Uuid,
        file: FileReplacement,
    ) -> Result<(Document, SupersededObjects), RepositoryError>;

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError>;

    async fn increment_counter(
        &self,
        id: Uuid,
        field: CounterField,
    ) -> Result<Document, RepositoryError>;

    async fn toggle_pinned(&self, id: Uuid) -> Result<Document, RepositoryError>;

    async fn aggregate_stats(&self) -> Result<CatalogStats, RepositoryError>;

    /// Distinct class levels in use, ascending.
    async fn class_levels(&self) -> Result<Vec<ClassLevel>, RepositoryError>;

    /// Distinct subjects in use, by name, optionally within one class level.
    async fn subjects(
        &self,
        class_level: Option<ClassLevel>,
    ) -> Result<Vec<Subject>, RepositoryError>;
}

/// Escapes `%`, `_` and `\` so user search text matches literally.
pub fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for ch in search.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}
