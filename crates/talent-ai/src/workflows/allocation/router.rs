use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::collaborators::{CandidateEvaluator, IntentResolver};
use super::domain::{CandidateId, CandidateSubmission, Grade, PositionDraft, PositionId};
use super::repository::AllocationRepository;
use super::service::{AllocationError, AllocationService};

type SharedService<R, E, I> = Arc<AllocationService<R, E, I>>;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageParams {
    #[serde(default)]
    skip: usize,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GradeFilter {
    min_grade: Option<String>,
}

/// Router builder exposing candidate intake, read models, and position lifecycle endpoints.
pub fn allocation_router<R, E, I>(service: SharedService<R, E, I>) -> Router
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
{
    Router::new()
        .route(
            "/api/v1/candidates",
            post(intake_handler::<R, E, I>).get(list_candidates_handler::<R, E, I>),
        )
        .route(
            "/api/v1/candidates/:candidate_id",
            get(candidate_handler::<R, E, I>),
        )
        .route(
            "/api/v1/candidates/:candidate_id/history",
            get(history_handler::<R, E, I>),
        )
        .route(
            "/api/v1/candidates/:candidate_id/reevaluate",
            post(reevaluate_handler::<R, E, I>),
        )
        .route(
            "/api/v1/positions",
            post(create_position_handler::<R, E, I>).get(list_positions_handler::<R, E, I>),
        )
        .route(
            "/api/v1/positions/:position_id",
            get(position_handler::<R, E, I>),
        )
        .route(
            "/api/v1/positions/:position_id/candidates",
            get(position_candidates_handler::<R, E, I>),
        )
        .route(
            "/api/v1/positions/:position_id/reactivate",
            post(reactivate_handler::<R, E, I>),
        )
        .route(
            "/api/v1/positions/:position_id/deactivate",
            post(deactivate_handler::<R, E, I>),
        )
        .with_state(service)
}

pub(crate) fn error_response(err: AllocationError) -> Response {
    let status = match &err {
        AllocationError::EmptyPositionCatalog | AllocationError::InactivePosition(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AllocationError::CandidateNotFound(_) | AllocationError::PositionNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        AllocationError::PositionConflict(_) | AllocationError::PersistenceConflict { .. } => {
            StatusCode::CONFLICT
        }
        AllocationError::InvariantViolation(_)
        | AllocationError::InvariantViolations(_)
        | AllocationError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(code = err.code(), error = %err, "allocation request failed");
    }

    let mut payload = json!({
        "error": err.to_string(),
        "code": err.code(),
    });
    if let AllocationError::InvariantViolations(report) = &err {
        payload["report"] = json!(report);
    }
    (status, axum::Json(payload)).into_response()
}

pub(crate) async fn intake_handler<R, E, I>(
    State(service): State<SharedService<R, E, I>>,
    axum::Json(submission): axum::Json<CandidateSubmission>,
) -> Response
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
{
    match service.process_intake(submission).await {
        Ok(outcome) => (StatusCode::CREATED, axum::Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn candidate_handler<R, E, I>(
    State(service): State<SharedService<R, E, I>>,
    Path(candidate_id): Path<u64>,
) -> Response
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
{
    match service.candidate(CandidateId(candidate_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn history_handler<R, E, I>(
    State(service): State<SharedService<R, E, I>>,
    Path(candidate_id): Path<u64>,
) -> Response
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
{
    let id = CandidateId(candidate_id);
    let history = service.allocation_history(id).and_then(|history| {
        let scores = service.score_records(id)?;
        let audit = service.audit_trail(id)?;
        Ok(json!({
            "candidate_id": id,
            "history": history,
            "scores": scores,
            "audit": audit,
        }))
    });
    match history {
        Ok(payload) => (StatusCode::OK, axum::Json(payload)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn reevaluate_handler<R, E, I>(
    State(service): State<SharedService<R, E, I>>,
    Path(candidate_id): Path<u64>,
) -> Response
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
{
    match service.reevaluate(CandidateId(candidate_id)).await {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn create_position_handler<R, E, I>(
    State(service): State<SharedService<R, E, I>>,
    axum::Json(draft): axum::Json<PositionDraft>,
) -> Response
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
{
    if draft.name.trim().is_empty() {
        let payload = json!({
            "error": "position name must not be empty",
            "code": "POSITION_NAME_REQUIRED",
        });
        return (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response();
    }

    match service.create_position(draft).await {
        Ok(registration) => (StatusCode::CREATED, axum::Json(registration)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn reactivate_handler<R, E, I>(
    State(service): State<SharedService<R, E, I>>,
    Path(position_id): Path<u64>,
) -> Response
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
{
    match service.reactivate_position(PositionId(position_id)).await {
        Ok(registration) => (StatusCode::OK, axum::Json(registration)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn deactivate_handler<R, E, I>(
    State(service): State<SharedService<R, E, I>>,
    Path(position_id): Path<u64>,
) -> Response
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
{
    match service.deactivate_position(PositionId(position_id)) {
        Ok(position) => (StatusCode::OK, axum::Json(position)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn list_candidates_handler<R, E, I>(
    State(service): State<SharedService<R, E, I>>,
    Query(params): Query<PageParams>,
) -> Response
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
{
    match service.list_candidates(params.skip, params.limit) {
        Ok(page) => (StatusCode::OK, axum::Json(page)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn list_positions_handler<R, E, I>(
    State(service): State<SharedService<R, E, I>>,
) -> Response
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
{
    match service.list_positions() {
        Ok(positions) => {
            let payload = json!({ "total": positions.len(), "positions": positions });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn position_handler<R, E, I>(
    State(service): State<SharedService<R, E, I>>,
    Path(position_id): Path<u64>,
) -> Response
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
{
    match service.position(PositionId(position_id)) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn position_candidates_handler<R, E, I>(
    State(service): State<SharedService<R, E, I>>,
    Path(position_id): Path<u64>,
    Query(filter): Query<GradeFilter>,
) -> Response
where
    R: AllocationRepository + 'static,
    E: CandidateEvaluator + 'static,
    I: IntentResolver + 'static,
{
    let min_grade = match filter.min_grade.as_deref() {
        None => Grade::C,
        Some(raw) => match Grade::parse(raw) {
            Some(grade) => grade,
            None => {
                let payload = json!({
                    "error": format!("unknown grade '{raw}'"),
                    "code": "INVALID_GRADE",
                });
                return (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response();
            }
        },
    };

    let id = PositionId(position_id);
    match service.candidates_for_position(id, min_grade) {
        Ok(candidates) => {
            let payload = json!({
                "position_id": id,
                "min_grade": min_grade,
                "total": candidates.len(),
                "candidates": candidates,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}
