use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::ReportingAccess;
use crate::core::state::AppState;
use crate::schemas::progress::{
    AdminProgressQuery, AdminProgressResponse, MentorProgressQuery, MentorProgressResponse,
};
use crate::services::progress::ProgressAggregator;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/mentors/:mentor_id", get(mentor_progress))
        .route("/admin", get(admin_progress))
}

fn aggregator(state: &AppState) -> ProgressAggregator {
    ProgressAggregator::new(state.store().clone(), state.clock().clone())
}

async fn mentor_progress(
    _access: ReportingAccess,
    State(state): State<AppState>,
    Path(mentor_id): Path<i64>,
    Query(query): Query<MentorProgressQuery>,
) -> Result<Json<MentorProgressResponse>, ApiError> {
    query.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let mentor = state
        .store()
        .current_mentor(mentor_id, state.clock().now())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load mentor"))?;
    if mentor.is_none() {
        return Err(ApiError::NotFound("Mentor not found".to_string()));
    }

    let overview = aggregator(&state)
        .overview(mentor_id, &query.filter())
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}"), "Failed to build progress overview"))?;

    Ok(Json(MentorProgressResponse::from_overview(mentor_id, &overview, query.offset, query.limit)))
}

async fn admin_progress(
    _access: ReportingAccess,
    State(state): State<AppState>,
    Query(query): Query<AdminProgressQuery>,
) -> Result<Json<AdminProgressResponse>, ApiError> {
    query.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let overview = aggregator(&state)
        .admin_overview(query.training_id, query.lesson_id)
        .await
        .map_err(|e| ApiError::internal(format!("{e:#}"), "Failed to build admin overview"))?;

    Ok(Json(AdminProgressResponse::from_overview(&overview)))
}
