use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Kind of AI job. The wire form (`type` in request/response bodies) is the
/// snake_case string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    GenerateCatalogImage,
    InferItem,
    ExtractLabel,
    GenerateOutfit,
    GenerateOutfitVisualization,
}

impl JobKind {
    /// Kinds that operate on a single item's image.
    pub fn requires_item(&self) -> bool {
        matches!(
            self,
            JobKind::GenerateCatalogImage | JobKind::InferItem | JobKind::ExtractLabel
        )
    }

    /// Kinds that operate on an outfit's constituent items.
    pub fn requires_outfit(&self) -> bool {
        matches!(
            self,
            JobKind::GenerateOutfit | JobKind::GenerateOutfitVisualization
        )
    }
}

/// Status of an AI job. Transitions are strictly forward:
/// `queued -> processing -> {completed | failed}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Forward-only transition rule. `processing -> processing` is allowed
    /// so a redelivered attempt can re-enter processing; a record never
    /// returns to `queued` and terminal states accept nothing.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    /// Statuses from which `next` may be entered, as their wire strings.
    /// Used to build the guarded UPDATE in the record store.
    pub fn allowed_predecessors(next: JobStatus) -> &'static [&'static str] {
        match next {
            JobStatus::Queued => &[],
            JobStatus::Processing => &["queued", "processing"],
            JobStatus::Completed | JobStatus::Failed => &["processing"],
        }
    }
}

/// Visualization rendering mode for outfit jobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VisualizationMode {
    OutfitBoard,
    PersonWearing,
}

/// Coordinated-set size for catalog image generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SetType {
    TwoPiece,
    ThreePiece,
    CompleteOutfit,
}

/// Input payload for `generate_catalog_image`, discriminated by `mode`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CatalogImageInput {
    /// Generate an item matching the reference image in a target category.
    MatchingItem {
        #[garde(length(min = 1, max = 100))]
        target_category: String,
        #[garde(inner(length(max = 500)))]
        style_notes: Option<String>,
    },
    /// Generate a coordinated set built around the reference item.
    CoordinatedSet {
        #[garde(skip)]
        set_type: SetType,
    },
    /// Re-render the item in the style of a reference image.
    StyleTransfer {
        #[garde(length(min = 1, max = 512))]
        style_image_key: String,
        #[garde(range(min = 0.3, max = 0.9))]
        strength: f64,
    },
}

/// Input payload for `generate_outfit` (context variation).
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct OutfitVariationInput {
    #[garde(length(min = 1, max = 200))]
    pub target_context: String,
    /// Item ids within the outfit that must be kept as-is.
    #[garde(skip)]
    #[serde(default)]
    pub maintain_pieces: Vec<Uuid>,
}

/// Input payload for `generate_outfit_visualization`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct VisualizationInput {
    #[garde(skip)]
    pub mode: VisualizationMode,
}

/// Type-dependent job input, discriminated by the job kind. Stored verbatim
/// as the record's `input` JSONB column, so the dispatcher can recover the
/// typed payload from the record alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobInput {
    GenerateCatalogImage(CatalogImageInput),
    InferItem {},
    ExtractLabel {},
    GenerateOutfit(OutfitVariationInput),
    GenerateOutfitVisualization(VisualizationInput),
}

impl JobInput {
    pub fn kind(&self) -> JobKind {
        match self {
            JobInput::GenerateCatalogImage(_) => JobKind::GenerateCatalogImage,
            JobInput::InferItem {} => JobKind::InferItem,
            JobInput::ExtractLabel {} => JobKind::ExtractLabel,
            JobInput::GenerateOutfit(_) => JobKind::GenerateOutfit,
            JobInput::GenerateOutfitVisualization(_) => JobKind::GenerateOutfitVisualization,
        }
    }

    /// Build the typed input from the submitted kind and raw `inputRefs`
    /// payload. `infer_item` / `extract_label` take no payload; the
    /// generation kinds require one.
    pub fn from_request(
        kind: JobKind,
        input_refs: Option<serde_json::Value>,
    ) -> Result<Self, InputError> {
        let parsed = match kind {
            JobKind::InferItem => JobInput::InferItem {},
            JobKind::ExtractLabel => JobInput::ExtractLabel {},
            JobKind::GenerateCatalogImage => {
                let raw = input_refs.ok_or(InputError::MissingPayload(kind))?;
                let inner: CatalogImageInput =
                    serde_json::from_value(raw).map_err(|e| InputError::Malformed(kind, e))?;
                inner.validate().map_err(InputError::Invalid)?;
                JobInput::GenerateCatalogImage(inner)
            }
            JobKind::GenerateOutfit => {
                let raw = input_refs.ok_or(InputError::MissingPayload(kind))?;
                let inner: OutfitVariationInput =
                    serde_json::from_value(raw).map_err(|e| InputError::Malformed(kind, e))?;
                inner.validate().map_err(InputError::Invalid)?;
                JobInput::GenerateOutfit(inner)
            }
            JobKind::GenerateOutfitVisualization => {
                let raw =
                    input_refs.unwrap_or_else(|| serde_json::json!({ "mode": "outfit_board" }));
                let inner: VisualizationInput =
                    serde_json::from_value(raw).map_err(|e| InputError::Malformed(kind, e))?;
                JobInput::GenerateOutfitVisualization(inner)
            }
        };
        Ok(parsed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("job type {0} requires an inputRefs payload")]
    MissingPayload(JobKind),

    #[error("inputRefs payload does not match job type {0}: {1}")]
    Malformed(JobKind, #[source] serde_json::Error),

    #[error("inputRefs payload failed validation: {0}")]
    Invalid(garde::Report),
}

/// A durably tracked unit of AI work. The only queryable representation of
/// a job; queue bookkeeping is never exposed to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outfit_id: Option<Uuid>,
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    pub attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Structured error persisted on the terminal `failed` transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_forward_only() {
        use JobStatus::*;

        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        // No path ever returns to queued.
        for from in [Queued, Processing, Completed, Failed] {
            assert!(!from.can_transition_to(Queued));
        }
        // Terminal states accept nothing.
        for to in [Queued, Processing, Completed, Failed] {
            assert!(!Completed.can_transition_to(to));
            assert!(!Failed.can_transition_to(to));
        }
        // Queued cannot jump straight to a terminal state.
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Queued.can_transition_to(Failed));
    }

    #[test]
    fn status_round_trips_through_wire_strings() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            let s = status.to_string();
            assert_eq!(s.parse::<JobStatus>().unwrap(), status);
        }
        assert_eq!(JobStatus::Queued.to_string(), "queued");
        assert_eq!(
            JobKind::GenerateOutfitVisualization.to_string(),
            "generate_outfit_visualization"
        );
    }

    #[test]
    fn input_tagged_by_job_type() {
        let input = JobInput::GenerateCatalogImage(CatalogImageInput::StyleTransfer {
            style_image_key: "assets/style/1.jpg".into(),
            strength: 0.5,
        });
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["type"], "generate_catalog_image");
        assert_eq!(value["mode"], "style_transfer");

        let back: JobInput = serde_json::from_value(value).unwrap();
        assert_eq!(back, input);
    }

    #[test]
    fn from_request_rejects_out_of_range_strength() {
        let raw = serde_json::json!({
            "mode": "style_transfer",
            "style_image_key": "assets/style/1.jpg",
            "strength": 0.95
        });
        let err = JobInput::from_request(JobKind::GenerateCatalogImage, Some(raw)).unwrap_err();
        assert!(matches!(err, InputError::Invalid(_)));
    }

    #[test]
    fn from_request_requires_payload_for_generation_kinds() {
        let err = JobInput::from_request(JobKind::GenerateOutfit, None).unwrap_err();
        assert!(matches!(
            err,
            InputError::MissingPayload(JobKind::GenerateOutfit)
        ));
    }

    #[test]
    fn from_request_defaults_visualization_mode() {
        let input = JobInput::from_request(JobKind::GenerateOutfitVisualization, None).unwrap();
        assert_eq!(
            input,
            JobInput::GenerateOutfitVisualization(VisualizationInput {
                mode: VisualizationMode::OutfitBoard
            })
        );
    }

    #[test]
    fn from_request_rejects_mismatched_payload() {
        let raw = serde_json::json!({ "target_context": 42 });
        let err = JobInput::from_request(JobKind::GenerateOutfit, Some(raw)).unwrap_err();
        assert!(matches!(
            err,
            InputError::Malformed(JobKind::GenerateOutfit, _)
        ));
    }

    #[test]
    fn set_type_uses_kebab_case_wire_form() {
        assert_eq!(
            serde_json::to_value(SetType::CompleteOutfit).unwrap(),
            serde_json::json!("complete-outfit")
        );
    }
}
