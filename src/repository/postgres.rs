use async_trait::async_trait;
use chrono::Utc;
use diesel::{
    dsl::{count_star, not, sql},
    expression_methods::PgTextExpressionMethods,
    pg::{Pg, PgConnection},
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
    sql_types::BigInt,
};
use tokio::task;
use tracing::debug;
use uuid::Uuid;

use super::{like_pattern, DocumentRepository, RepositoryError};
use crate::{
    db::PgPool,
    document::{
        CatalogStats, ClassLevel, CounterField, Document, DocumentFilter, DocumentPatch,
        DocumentQuery, FileReplacement, NewDocument, Page, SortOrder, Subject,
        SupersededObjects,
    },
    models::{DocumentChangeset, DocumentRow, NewDocumentRow},
    schema::documents,
};

#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: PgPool,
}

impl PgDocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, op: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, RepositoryError> + Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|err| {
                RepositoryError::Unavailable(format!("database pool error: {err}"))
            })?;
            op(&mut conn)
        })
        .await
        .map_err(|err| RepositoryError::Query(format!("repository task failed: {err}")))?
    }
}

fn map_error(err: DieselError, id: Option<Uuid>) -> RepositoryError {
    match err {
        DieselError::NotFound => match id {
            Some(id) => RepositoryError::NotFound(id),
            None => RepositoryError::Query("row not found".to_string()),
        },
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            RepositoryError::Conflict(info.message().to_string())
        }
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
            RepositoryError::Unavailable(info.message().to_string())
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

fn to_document(row: DocumentRow) -> Result<Document, RepositoryError> {
    Document::try_from(row).map_err(RepositoryError::Query)
}

fn filtered(filter: &DocumentFilter) -> documents::BoxedQuery<'static, Pg> {
    let mut query = documents::table.into_boxed();

    if let Some(subject) = filter.subject {
        query = query.filter(documents::subject.eq(subject.as_str()));
    }
    if let Some(class_level) = filter.class_level {
        query = query.filter(documents::class_level.eq(i32::from(class_level.get())));
    }
    if let Some(pinned) = filter.pinned {
        query = query.filter(documents::pinned.eq(pinned));
    }
    if let Some(search) = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|search| !search.is_empty())
    {
        let pattern = like_pattern(search);
        query = query.filter(
            documents::title
                .ilike(pattern.clone())
                .or(documents::description.ilike(pattern)),
        );
    }

    query
}

fn ordered(
    query: documents::BoxedQuery<'static, Pg>,
    sort: SortOrder,
) -> documents::BoxedQuery<'static, Pg> {
    // `id` breaks ties so that paging never repeats or skips rows.
    match sort {
        SortOrder::Default => query.order((
            documents::pinned.desc(),
            documents::created_at.desc(),
            documents::id.desc(),
        )),
        SortOrder::Newest => query.order((documents::created_at.desc(), documents::id.desc())),
        SortOrder::Oldest => query.order((documents::created_at.asc(), documents::id.asc())),
        SortOrder::Title => query.order((documents::title.asc(), documents::id.asc())),
        SortOrder::Popular => query.order((
            documents::view_count.desc(),
            documents::created_at.desc(),
            documents::id.desc(),
        )),
    }
}

fn changeset_from(patch: DocumentPatch) -> DocumentChangeset {
    DocumentChangeset {
        title: patch.title,
        description: patch.description.map(Option::unwrap_or_default),
        subject: patch.subject.map(|subject| subject.as_str().to_string()),
        class_level: patch
            .class_level
            .map(|class_level| i32::from(class_level.get())),
        pinned: patch.pinned,
        updated_at: Some(Utc::now().naive_utc()),
        ..DocumentChangeset::default()
    }
}

fn parse_subject_column(value: String) -> Result<Subject, RepositoryError> {
    value
        .parse::<Subject>()
        .map_err(|value| RepositoryError::Query(format!("unknown subject `{value}`")))
}

fn parse_class_column(level: i32) -> Result<ClassLevel, RepositoryError> {
    ClassLevel::new(i64::from(level))
        .ok_or_else(|| RepositoryError::Query(format!("out-of-range class level {level}")))
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn insert(&self, document: NewDocument) -> Result<Document, RepositoryError> {
        self.run(move |conn| {
            let id = Uuid::new_v4();
            let row = NewDocumentRow::from_new(id, document, Utc::now().naive_utc());
            let inserted = diesel::insert_into(documents::table)
                .values(&row)
                .returning(DocumentRow::as_returning())
                .get_result(conn)
                .map_err(|err| map_error(err, None))?;
            debug!(document_id = %id, "inserted document row");
            to_document(inserted)
        })
        .await
    }

    async fn find(&self, query: &DocumentQuery) -> Result<Page<Document>, RepositoryError> {
        let query = query.clone();
        self.run(move |conn| {
            let total: i64 = filtered(&query.filter)
                .count()
                .get_result(conn)
                .map_err(|err| map_error(err, None))?;

            let rows: Vec<DocumentRow> = ordered(filtered(&query.filter), query.sort)
                .offset(query.page.offset())
                .limit(query.page.limit())
                .select(DocumentRow::as_select())
                .load(conn)
                .map_err(|err| map_error(err, None))?;

            let items = rows
                .into_iter()
                .map(to_document)
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Page {
                items,
                total,
                request: query.page,
            })
        })
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Document, RepositoryError> {
        self.run(move |conn| {
            let row = documents::table
                .find(id)
                .select(DocumentRow::as_select())
                .first(conn)
                .map_err(|err| map_error(err, Some(id)))?;
            to_document(row)
        })
        .await
    }

    async fn update(&self, id: Uuid, patch: DocumentPatch) -> Result<Document, RepositoryError> {
        self.run(move |conn| {
            let changeset = changeset_from(patch);
            let row = diesel::update(documents::table.find(id))
                .set(&changeset)
                .returning(DocumentRow::as_returning())
                .get_result(conn)
                .map_err(|err| map_error(err, Some(id)))?;
            to_document(row)
        })
        .await
    }

    async fn replace_file(
        &self,
        id: Uuid,
        file: FileReplacement,
    ) -> Result<(Document, SupersededObjects), RepositoryError> {
        self.run(move |conn| {
            let (row, superseded) = conn
                .transaction(|conn| {
                    let (storage_file_id, thumbnail_storage_id) = documents::table
                        .find(id)
                        .select((documents::storage_file_id, documents::thumbnail_storage_id))
                        .for_update()
                        .first::<(String, String)>(conn)?;

                    let mut changeset = DocumentChangeset {
                        updated_at: Some(Utc::now().naive_utc()),
                        ..DocumentChangeset::default()
                    };
                    changeset.apply_file(file);
                    let row = diesel::update(documents::table.find(id))
                        .set(&changeset)
                        .returning(DocumentRow::as_returning())
                        .get_result(conn)?;

                    Ok::<_, DieselError>((
                        row,
                        SupersededObjects {
                            storage_file_id,
                            thumbnail_storage_id,
                        },
                    ))
                })
                .map_err(|err| map_error(err, Some(id)))?;
            Ok((to_document(row)?, superseded))
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.run(move |conn| {
            let removed = diesel::delete(documents::table.find(id))
                .execute(conn)
                .map_err(|err| map_error(err, Some(id)))?;
            if removed == 0 {
                return Err(RepositoryError::NotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn increment_counter(
        &self,
        id: Uuid,
        field: CounterField,
    ) -> Result<Document, RepositoryError> {
        self.run(move |conn| {
            let target = documents::table.find(id);
            let result = match field {
                CounterField::Views => diesel::update(target)
                    .set(documents::view_count.eq(documents::view_count + 1i64))
                    .returning(DocumentRow::as_returning())
                    .get_result(conn),
                CounterField::Downloads => diesel::update(target)
                    .set(documents::download_count.eq(documents::download_count + 1i64))
                    .returning(DocumentRow::as_returning())
                    .get_result(conn),
            };
            to_document(result.map_err(|err| map_error(err, Some(id)))?)
        })
        .await
    }

    async fn toggle_pinned(&self, id: Uuid) -> Result<Document, RepositoryError> {
        self.run(move |conn| {
            let row = diesel::update(documents::table.find(id))
                .set((
                    documents::pinned.eq(not(documents::pinned)),
                    documents::updated_at.eq(Utc::now().naive_utc()),
                ))
                .returning(DocumentRow::as_returning())
                .get_result(conn)
                .map_err(|err| map_error(err, Some(id)))?;
            to_document(row)
        })
        .await
    }

    async fn aggregate_stats(&self) -> Result<CatalogStats, RepositoryError> {
        self.run(|conn| {
            let raw = conn
                .transaction(load_stats)
                .map_err(|err| map_error(err, None))?;
            raw.into_stats()
        })
        .await
    }

    async fn class_levels(&self) -> Result<Vec<ClassLevel>, RepositoryError> {
        self.run(|conn| {
            let levels: Vec<i32> = documents::table
                .select(documents::class_level)
                .distinct()
                .order(documents::class_level.asc())
                .load(conn)
                .map_err(|err| map_error(err, None))?;
            levels.into_iter().map(parse_class_column).collect()
        })
        .await
    }

    async fn subjects(
        &self,
        class_level: Option<ClassLevel>,
    ) -> Result<Vec<Subject>, RepositoryError> {
        self.run(move |conn| {
            let mut query = documents::table
                .select(documents::subject)
                .distinct()
                .order(documents::subject.asc())
                .into_boxed();
            if let Some(class_level) = class_level {
                query = query.filter(documents::class_level.eq(i32::from(class_level.get())));
            }
            let subjects: Vec<String> = query.load(conn).map_err(|err| map_error(err, None))?;
            subjects.into_iter().map(parse_subject_column).collect()
        })
        .await
    }
}

struct RawStats {
    total_documents: i64,
    pinned_documents: i64,
    total_views: i64,
    total_downloads: i64,
    subjects: Vec<(String, i64)>,
    classes: Vec<(i32, i64)>,
}

impl RawStats {
    fn into_stats(self) -> Result<CatalogStats, RepositoryError> {
        let by_subject = self
            .subjects
            .into_iter()
            .map(|(subject, count)| parse_subject_column(subject).map(|subject| (subject, count)))
            .collect::<Result<Vec<_>, _>>()?;

        let by_class = self
            .classes
            .into_iter()
            .map(|(level, count)| parse_class_column(level).map(|level| (level, count)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CatalogStats {
            total_documents: self.total_documents,
            pinned_documents: self.pinned_documents,
            total_views: self.total_views,
            total_downloads: self.total_downloads,
            by_subject,
            by_class,
        })
    }
}

fn load_stats(conn: &mut PgConnection) -> QueryResult<RawStats> {
    let total_documents: i64 = documents::table.count().get_result(conn)?;
    let pinned_documents: i64 = documents::table
        .filter(documents::pinned.eq(true))
        .count()
        .get_result(conn)?;
    let (total_views, total_downloads) = documents::table
        .select((
            sql::<BigInt>("COALESCE(SUM(view_count), 0)::BIGINT"),
            sql::<BigInt>("COALESCE(SUM(download_count), 0)::BIGINT"),
        ))
        .first::<(i64, i64)>(conn)?;
    let subjects: Vec<(String, i64)> = documents::table
        .group_by(documents::subject)
        .select((documents::subject, count_star()))
        .order(documents::subject.asc())
        .load(conn)?;
    let classes: Vec<(i32, i64)> = documents::table
        .group_by(documents::class_level)
        .select((documents::class_level, count_star()))
        .order(documents::class_level.asc())
        .load(conn)?;

    Ok(RawStats {
        total_documents,
        pinned_documents,
        total_views,
        total_downloads,
        subjects,
        classes,
    })
}
