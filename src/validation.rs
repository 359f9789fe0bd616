//! Turns raw upload and update requests into typed commands.
//!
//! Upload rules run in a fixed order and stop at the first failure:
//! file present and declared as PDF, file within the size ceiling, required
//! fields present, class level in range, subject in the closed set. Values
//! are trimmed and normalized but never coerced: a malformed value is
//! rejected together with what was received.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::document::{ClassLevel, DocumentPatch, Subject};
use crate::utils::json::{classify_nullable, NullableValue};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

const TITLE_FIELDS: &[&str] = &["title"];
const DESCRIPTION_FIELDS: &[&str] = &["description"];
const SUBJECT_FIELDS: &[&str] = &["subject"];
const CLASS_LEVEL_FIELDS: &[&str] = &["class_level", "classLevel", "class", "classNumber"];
const PINNED_FIELDS: &[&str] = &["pinned"];
const FALLBACK_FILENAME: &str = "document.pdf";

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("a PDF file is required")]
    MissingFile,
    #[error("the uploaded file is empty")]
    EmptyFile,
    #[error("only PDF files are allowed (received content type '{content_type}')")]
    NotPdf { content_type: String },
    #[error("file is {size} bytes, the maximum is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
    #[error("upload is larger than the maximum file size of {limit} bytes")]
    UploadTooLarge { limit: u64 },
    #[error("{field} is required")]
    MissingField { field: &'static str },
    #[error("class level must be a whole number between 6 and 12 (received '{value}')")]
    InvalidClassLevel { value: String },
    #[error("subject must be one of biology, physics, chemistry (received '{value}')")]
    InvalidSubject { value: String },
    #[error("pinned must be true or false (received '{value}')")]
    InvalidPinned { value: String },
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{field} has an invalid value: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("no changes provided")]
    EmptyUpdate,
}

impl ValidationError {
    /// Stable identifier of the rule that rejected the request.
    pub fn rule(&self) -> &'static str {
        match self {
            ValidationError::MissingFile => "file_required",
            ValidationError::EmptyFile => "file_empty",
            ValidationError::NotPdf { .. } => "file_not_pdf",
            ValidationError::FileTooLarge { .. } | ValidationError::UploadTooLarge { .. } => {
                "file_too_large"
            }
            ValidationError::MissingField { .. } => "field_required",
            ValidationError::InvalidClassLevel { .. } => "class_level_out_of_range",
            ValidationError::InvalidSubject { .. } => "subject_unknown",
            ValidationError::InvalidPinned { .. } => "pinned_not_boolean",
            ValidationError::TooLong { .. } => "field_too_long",
            ValidationError::InvalidField { .. } => "field_invalid",
            ValidationError::EmptyUpdate => "no_changes",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_file_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    pub original_filename: Option<String>,
}

/// An upload as it arrives: an optional file plus the raw text fields.
#[derive(Debug, Clone, Default)]
pub struct UploadCandidate {
    pub file: Option<UploadedFile>,
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfFile {
    pub bytes: Bytes,
    pub original_filename: String,
}

impl PdfFile {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadCommand {
    pub title: String,
    pub description: Option<String>,
    pub subject: Subject,
    pub class_level: ClassLevel,
    pub pinned: bool,
    pub file: PdfFile,
}

pub fn validate_upload(
    candidate: UploadCandidate,
    limits: &UploadLimits,
) -> Result<UploadCommand, ValidationError> {
    let UploadCandidate { file, fields } = candidate;

    let file = validate_file(file, limits)?;

    let title = required_field(&fields, TITLE_FIELDS, "title")?;
    let subject_raw = required_field(&fields, SUBJECT_FIELDS, "subject")?;
    let class_raw = required_field(&fields, CLASS_LEVEL_FIELDS, "class_level")?;

    let class_level = parse_class_level(&class_raw)?;
    let subject = parse_subject(&subject_raw)?;

    let description = lookup(&fields, DESCRIPTION_FIELDS)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    check_length(&title, "title", MAX_TITLE_CHARS)?;
    if let Some(description) = &description {
        check_length(description, "description", MAX_DESCRIPTION_CHARS)?;
    }

    let pinned = match lookup(&fields, PINNED_FIELDS).map(str::trim) {
        None | Some("") => false,
        Some(value) => parse_pinned(value)?,
    };

    Ok(UploadCommand {
        title,
        description,
        subject,
        class_level,
        pinned,
        file,
    })
}

/// File-level rules only; shared by uploads and file replacement.
pub fn validate_file(
    file: Option<UploadedFile>,
    limits: &UploadLimits,
) -> Result<PdfFile, ValidationError> {
    let file = file.ok_or(ValidationError::MissingFile)?;

    let content_type = file.content_type.as_deref().unwrap_or_default();
    if !is_pdf_content_type(content_type) {
        return Err(ValidationError::NotPdf {
            content_type: content_type.to_string(),
        });
    }

    if file.bytes.is_empty() {
        return Err(ValidationError::EmptyFile);
    }

    let size = file.bytes.len() as u64;
    if size > limits.max_file_bytes {
        return Err(ValidationError::FileTooLarge {
            size,
            limit: limits.max_file_bytes,
        });
    }

    let original_filename = file
        .original_filename
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(FALLBACK_FILENAME)
        .to_string();

    Ok(PdfFile {
        bytes: file.bytes,
        original_filename,
    })
}

/// Validates a JSON update body. Only keys present in the body change.
pub fn validate_patch(body: &Map<String, Value>) -> Result<DocumentPatch, ValidationError> {
    let mut patch = DocumentPatch::default();

    if let Some(value) = body.get("title") {
        let title = expect_string(value, "title")?;
        let trimmed = title.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MissingField { field: "title" });
        }
        check_length(trimmed, "title", MAX_TITLE_CHARS)?;
        patch.title = Some(trimmed.to_string());
    }

    match classify_nullable(body.get("description")) {
        Ok(NullableValue::Omitted) => {}
        Ok(NullableValue::Null) => patch.description = Some(None),
        Ok(NullableValue::String(text)) => {
            let trimmed = text.trim();
            check_length(trimmed, "description", MAX_DESCRIPTION_CHARS)?;
            patch.description = Some((!trimmed.is_empty()).then(|| trimmed.to_string()));
        }
        Err(reason) => {
            return Err(ValidationError::InvalidField {
                field: "description",
                reason,
            })
        }
    }

    if let Some(value) = body.get("subject") {
        let raw = expect_string(value, "subject")?;
        patch.subject = Some(parse_subject(raw)?);
    }

    if let Some(value) = CLASS_LEVEL_FIELDS.iter().find_map(|key| body.get(*key)) {
        let class_level = match value {
            Value::Number(number) => number
                .as_i64()
                .and_then(ClassLevel::new)
                .ok_or_else(|| ValidationError::InvalidClassLevel {
                    value: number.to_string(),
                })?,
            Value::String(text) => parse_class_level(text)?,
            other => {
                return Err(ValidationError::InvalidClassLevel {
                    value: other.to_string(),
                })
            }
        };
        patch.class_level = Some(class_level);
    }

    if let Some(value) = body.get("pinned") {
        patch.pinned = Some(match value {
            Value::Bool(flag) => *flag,
            Value::String(text) => parse_pinned(text.trim())?,
            other => {
                return Err(ValidationError::InvalidPinned {
                    value: other.to_string(),
                })
            }
        });
    }

    if patch.is_empty() {
        return Err(ValidationError::EmptyUpdate);
    }

    Ok(patch)
}

pub fn parse_class_level(raw: &str) -> Result<ClassLevel, ValidationError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(ClassLevel::new)
        .ok_or_else(|| ValidationError::InvalidClassLevel {
            value: raw.to_string(),
        })
}

pub fn parse_subject(raw: &str) -> Result<Subject, ValidationError> {
    raw.parse::<Subject>()
        .map_err(|value| ValidationError::InvalidSubject { value })
}

fn parse_pinned(raw: &str) -> Result<bool, ValidationError> {
    if raw.eq_ignore_ascii_case("true") || raw == "1" {
        Ok(true)
    } else if raw.eq_ignore_ascii_case("false") || raw == "0" {
        Ok(false)
    } else {
        Err(ValidationError::InvalidPinned {
            value: raw.to_string(),
        })
    }
}

fn is_pdf_content_type(raw: &str) -> bool {
    let essence = raw.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case(PDF_CONTENT_TYPE)
}

fn lookup<'a>(fields: &'a HashMap<String, String>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| fields.get(*name))
        .map(String::as_str)
}

fn required_field(
    fields: &HashMap<String, String>,
    names: &[&str],
    field: &'static str,
) -> Result<String, ValidationError> {
    lookup(fields, names)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(ValidationError::MissingField { field })
}

fn check_length(value: &str, field: &'static str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

fn expect_string<'a>(value: &'a Value, field: &'static str) -> Result<&'a str, ValidationError> {
    value.as_str().ok_or_else(|| ValidationError::InvalidField {
        field,
        reason: format!("expected string, got {value}"),
    })
}
