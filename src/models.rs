use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    document::{ClassLevel, Document, FileReplacement, NewDocument, Subject},
    schema::documents,
};

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = documents)]
pub struct DocumentRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub subject: String,
    pub class_level: i32,
    pub file_url: String,
    pub thumbnail_url: String,
    pub storage_file_id: String,
    pub thumbnail_storage_id: String,
    pub file_size_bytes: i64,
    pub original_filename: String,
    pub pinned: bool,
    pub view_count: i64,
    pub download_count: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocumentRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub subject: String,
    pub class_level: i32,
    pub file_url: String,
    pub thumbnail_url: String,
    pub storage_file_id: String,
    pub thumbnail_storage_id: String,
    pub file_size_bytes: i64,
    pub original_filename: String,
    pub pinned: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NewDocumentRow {
    pub fn from_new(id: Uuid, document: NewDocument, now: NaiveDateTime) -> Self {
        Self {
            id,
            title: document.title,
            description: document.description.unwrap_or_default(),
            subject: document.subject.as_str().to_string(),
            class_level: i32::from(document.class_level.get()),
            file_url: document.file_url,
            thumbnail_url: document.thumbnail_url,
            storage_file_id: document.storage_file_id,
            thumbnail_storage_id: document.thumbnail_storage_id,
            file_size_bytes: document.file_size_bytes,
            original_filename: document.original_filename,
            pinned: document.pinned,
            created_at: now,
            updated_at: now,
        }
    }
}

/// `None` fields are left out of the UPDATE statement.
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = documents)]
pub struct DocumentChangeset {
    pub title: Option<String>,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub class_level: Option<i32>,
    pub pinned: Option<bool>,
    pub file_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub storage_file_id: Option<String>,
    pub thumbnail_storage_id: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub original_filename: Option<String>,
    pub updated_at: Option<NaiveDateTime>,
}

impl DocumentChangeset {
    pub fn apply_file(&mut self, file: FileReplacement) {
        self.file_url = Some(file.file_url);
        self.thumbnail_url = Some(file.thumbnail_url);
        self.storage_file_id = Some(file.storage_file_id);
        self.thumbnail_storage_id = Some(file.thumbnail_storage_id);
        self.file_size_bytes = Some(file.file_size_bytes);
        self.original_filename = Some(file.original_filename);
    }
}

impl TryFrom<DocumentRow> for Document {
    type Error = String;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        let subject: Subject = row
            .subject
            .parse()
            .map_err(|value| format!("document {} has unknown subject `{value}`", row.id))?;
        let class_level = ClassLevel::new(i64::from(row.class_level)).ok_or_else(|| {
            format!(
                "document {} has out-of-range class level {}",
                row.id, row.class_level
            )
        })?;

        Ok(Document {
            id: row.id,
            title: row.title,
            description: Some(row.description).filter(|text| !text.is_empty()),
            subject,
            class_level,
            file_url: row.file_url,
            thumbnail_url: row.thumbnail_url,
            storage_file_id: row.storage_file_id,
            thumbnail_storage_id: row.thumbnail_storage_id,
            file_size_bytes: row.file_size_bytes,
            original_filename: row.original_filename,
            pinned: row.pinned,
            view_count: row.view_count,
            download_count: row.download_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
