//! Distinct values behind the catalog's cascading filters.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    document::{ClassLevel, Subject},
    error::{AppError, AppResult},
    state::AppState,
    validation::parse_class_level,
};

#[derive(Debug, Default, Deserialize)]
pub struct SubjectsQuery {
    #[serde(alias = "class", alias = "classLevel")]
    pub class_level: Option<String>,
}

pub async fn list_class_levels(State(state): State<AppState>) -> AppResult<Json<Vec<ClassLevel>>> {
    let levels = state.documents.class_levels().await?;
    Ok(Json(levels))
}

pub async fn list_subjects(
    State(state): State<AppState>,
    params: Result<Query<SubjectsQuery>, QueryRejection>,
) -> AppResult<Json<Vec<Subject>>> {
    let Query(params) = params.map_err(|err| AppError::bad_request(err.body_text()))?;
    let class_level = params
        .class_level
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(parse_class_level)
        .transpose()?;

    let subjects = state.documents.subjects(class_level).await?;
    Ok(Json(subjects))
}
