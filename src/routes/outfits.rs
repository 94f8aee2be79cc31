use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::catalog_queries;
use crate::error::AppError;
use crate::models::api::{VisualizeOutfitRequest, VisualizeOutfitResponse};
use crate::models::job::{JobKind, VisualizationMode};

/// POST /outfits/{id}/visualize — submit a visualization job for an outfit.
/// Domain wrapper over the generic submission path; checks the outfit has
/// something to render before a record is created.
pub async fn visualize_outfit(
    State(state): State<AppState>,
    Path(outfit_id): Path<Uuid>,
    body: Result<Option<Json<VisualizeOutfitRequest>>, JsonRejection>,
) -> Result<(StatusCode, Json<VisualizeOutfitResponse>), AppError> {
    let body = body.map_err(|e| AppError::Validation(e.body_text()))?;
    catalog_queries::get_outfit(&state.db, outfit_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("outfit {outfit_id}")))?;

    let pieces = catalog_queries::get_outfit_pieces(&state.db, outfit_id).await?;
    if pieces.is_empty() {
        return Err(AppError::Validation("outfit has no items".to_string()));
    }
    if pieces.iter().all(|p| p.image_key.is_none()) {
        return Err(AppError::Validation(
            "no item in the outfit has an image".to_string(),
        ));
    }

    let mode = body
        .and_then(|Json(b)| b.mode)
        .unwrap_or(VisualizationMode::OutfitBoard);

    let record = crate::services::gateway::submit(
        &state,
        JobKind::GenerateOutfitVisualization,
        None,
        Some(outfit_id),
        Some(serde_json::json!({ "mode": mode })),
    )
    .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(VisualizeOutfitResponse {
            job_id: record.id,
            status: record.status.to_string(),
        }),
    ))
}
