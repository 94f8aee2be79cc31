use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{JobKind, VisualizationMode};

/// Body of `POST /api/ai/jobs`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub item_id: Option<Uuid>,
    pub outfit_id: Option<Uuid>,
    pub input_refs: Option<serde_json::Value>,
}

/// Query parameters of `GET /api/ai/jobs`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsQuery {
    pub item_id: Option<Uuid>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Body of `POST /outfits/{id}/visualize`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizeOutfitRequest {
    pub mode: Option<VisualizationMode>,
}

/// Response for `POST /outfits/{id}/visualize` (202 Accepted).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizeOutfitResponse {
    pub job_id: Uuid,
    pub status: String,
}
