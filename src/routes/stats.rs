use axum::{extract::State, Json};
use serde::Serialize;

use crate::{
    document::{ClassLevel, Subject},
    error::AppResult,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct SubjectCount {
    pub subject: Subject,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct ClassCount {
    pub class_level: ClassLevel,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_documents: i64,
    pub pinned_documents: i64,
    pub total_views: i64,
    pub total_downloads: i64,
    pub by_subject: Vec<SubjectCount>,
    pub by_class: Vec<ClassCount>,
}

pub async fn get_stats(State(state): State<AppState>) -> AppResult<Json<StatsResponse>> {
    let stats = state.documents.aggregate_stats().await?;

    Ok(Json(StatsResponse {
        total_documents: stats.total_documents,
        pinned_documents: stats.pinned_documents,
        total_views: stats.total_views,
        total_downloads: stats.total_downloads,
        by_subject: stats
            .by_subject
            .into_iter()
            .map(|(subject, count)| SubjectCount { subject, count })
            .collect(),
        by_class: stats
            .by_class
            .into_iter()
            .map(|(class_level, count)| ClassCount { class_level, count })
            .collect(),
    }))
}
