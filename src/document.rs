use std::{fmt, str::FromStr};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_CLASS_LEVEL: u8 = 6;
pub const MAX_CLASS_LEVEL: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Biology,
    Physics,
    Chemistry,
}

impl Subject {
    pub const ALL: [Subject; 3] = [Subject::Biology, Subject::Physics, Subject::Chemistry];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Biology => "biology",
            Subject::Physics => "physics",
            Subject::Chemistry => "chemistry",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subject {
    type Err = String;

    /// Accepts any casing of the three subject names, surrounding whitespace
    /// ignored. Anything else is rejected verbatim.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Subject::ALL
            .into_iter()
            .find(|subject| subject.as_str() == normalized)
            .ok_or_else(|| value.to_string())
    }
}

/// School class a note is written for, always within 6..=12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClassLevel(u8);

impl ClassLevel {
    pub fn new(value: i64) -> Option<Self> {
        let range = i64::from(MIN_CLASS_LEVEL)..=i64::from(MAX_CLASS_LEVEL);
        range.contains(&value).then(|| Self(value as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ClassLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub subject: Subject,
    pub class_level: ClassLevel,
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

/// Everything the pipeline knows about a document before the repository
/// assigns its identifier and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    pub title: String,
    pub description: Option<String>,
    pub subject: Subject,
    pub class_level: ClassLevel,
    pub file_url: String,
    pub thumbnail_url: String,
    pub storage_file_id: String,
    pub thumbnail_storage_id: String,
    pub file_size_bytes: i64,
    pub original_filename: String,
    pub pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReplacement {
    pub file_url: String,
    pub thumbnail_url: String,
    pub storage_file_id: String,
    pub thumbnail_storage_id: String,
    pub file_size_bytes: i64,
    pub original_filename: String,
}

/// Storage ids a record referenced before its file was replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupersededObjects {
    pub storage_file_id: String,
    pub thumbnail_storage_id: String,
}

/// Partial metadata update. `None` leaves a field untouched; for
/// `description`, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub subject: Option<Subject>,
    pub class_level: Option<ClassLevel>,
    pub pinned: Option<bool>,
}

impl DocumentPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.subject.is_none()
            && self.class_level.is_none()
            && self.pinned.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    Views,
    Downloads,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub subject: Option<Subject>,
    pub class_level: Option<ClassLevel>,
    /// Case-insensitive substring matched against title and description.
    pub search: Option<String>,
    pub pinned: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Pinned first, then newest.
    #[default]
    Default,
    Newest,
    Oldest,
    Title,
    Popular,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "default" => Ok(SortOrder::Default),
            "newest" => Ok(SortOrder::Newest),
            "oldest" => Ok(SortOrder::Oldest),
            "title" => Ok(SortOrder::Title),
            "popular" => Ok(SortOrder::Popular),
            _ => Err(value.to_string()),
        }
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    /// Pages are 1-based; out-of-range values are clamped rather than rejected.
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentQuery {
    pub filter: DocumentFilter,
    pub sort: SortOrder,
    pub page: PageRequest,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Count of every row matching the filter, independent of the window.
    pub total: i64,
    pub request: PageRequest,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> i64 {
        let size = i64::from(self.request.page_size());
        (self.total + size - 1) / size
    }

    pub fn has_more(&self) -> bool {
        self.request.offset() + (self.items.len() as i64) < self.total
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub total_documents: i64,
    pub pinned_documents: i64,
    pub total_views: i64,
    pub total_downloads: i64,
    pub by_subject: Vec<(Subject, i64)>,
    pub by_class: Vec<(ClassLevel, i64)>,
}
