use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::job_queries;
use crate::error::AppError;
use crate::models::api::{ListJobsQuery, SubmitJobRequest};
use crate::models::job::{JobKind, JobRecord, JobStatus};

/// Page size cap for job listings.
const LIST_LIMIT: i64 = 50;

/// POST /api/ai/jobs — submit an AI job. The body extractor's rejection is
/// folded into the validation error so schema violations surface as 400,
/// not the extractor's default 422.
pub async fn submit_job(
    State(state): State<AppState>,
    body: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobRecord>), AppError> {
    let Json(body) = body.map_err(|e| AppError::Validation(e.body_text()))?;
    let record = crate::services::gateway::submit(
        &state,
        body.kind,
        body.item_id,
        body.outfit_id,
        body.input_refs,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/ai/jobs?itemId=&status=&type= — list jobs, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobRecord>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<JobStatus>()
                .map_err(|_| AppError::Validation(format!("unknown status {s:?}")))
        })
        .transpose()?;

    let kind = query
        .kind
        .as_deref()
        .map(|k| {
            k.parse::<JobKind>()
                .map_err(|_| AppError::Validation(format!("unknown job type {k:?}")))
        })
        .transpose()?;

    let records = job_queries::list_jobs(
        &state.db,
        query.item_id,
        status,
        kind.map(|k| k.to_string()),
        LIST_LIMIT,
    )
    .await?;
    Ok(Json(records))
}

/// GET /api/ai/jobs/{id} — poll one job record.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobRecord>, AppError> {
    let record = job_queries::get_job(&state.db, job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("job {job_id}")))?;
    Ok(Json(record))
}
