use std::time::Duration;

use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use crate::models::inference::{CareLabelFields, InferredItemAttributes};
use crate::models::job::{JobKind, SetType, VisualizationMode};

/// Generation model used for image-producing capabilities.
pub const IMAGE_MODEL: &str = "@cf/black-forest-labs/flux-1-schnell";

/// Vision model used for item inference and care-label extraction.
pub const VISION_MODEL: &str = "@cf/llava-hf/llava-1.5-7b-hf";

/// Every provider call is bounded by this; the dispatcher enforces the same
/// budget around the whole handler.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Model recorded on a job record of the given kind, for reproducibility.
pub fn model_for(kind: JobKind) -> &'static str {
    match kind {
        JobKind::InferItem | JobKind::ExtractLabel => VISION_MODEL,
        JobKind::GenerateCatalogImage
        | JobKind::GenerateOutfit
        | JobKind::GenerateOutfitVisualization => IMAGE_MODEL,
    }
}

/// One constituent outfit item sent to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderPiece {
    pub id: Uuid,
    pub image: String, // base64
    pub category: String,
}

/// A generated image as referenced by the provider's asset namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub image_key: String,
}

/// Client for the Workers AI generation service. Stateless; one HTTP call
/// per capability invocation, no retry of its own — retries belong to the
/// job queue.
pub struct GenAiClient {
    http: Client,
    api_base: String,
    api_token: String,
}

impl GenAiClient {
    /// `api_base` is the account-scoped run endpoint, e.g.
    /// `https://api.cloudflare.com/client/v4/accounts/<id>/ai/run`.
    pub fn new(api_base: &str, api_token: &str) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ProviderError::Http)?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        })
    }

    /// Generate a catalog image of an item matching the reference image in
    /// the target category.
    pub async fn generate_matching_item(
        &self,
        reference_image: &[u8],
        target_category: &str,
        style_notes: Option<&str>,
    ) -> Result<GeneratedImage, ProviderError> {
        let mut prompt = format!(
            "Generate a studio catalog photo of a {target_category} that pairs \
             naturally with the clothing item in the reference image."
        );
        if let Some(notes) = style_notes {
            prompt.push_str(&format!(" Style notes: {notes}."));
        }

        let body = serde_json::json!({
            "prompt": prompt,
            "image": encode(reference_image),
        });
        self.run_image(IMAGE_MODEL, body).await
    }

    /// Generate a coordinated set of items built around the reference image.
    pub async fn generate_coordinated_set(
        &self,
        reference_image: &[u8],
        set_type: SetType,
    ) -> Result<GeneratedImage, ProviderError> {
        let body = serde_json::json!({
            "prompt": format!(
                "Generate a catalog photo of a coordinated {} built around the \
                 clothing item in the reference image.",
                set_type_label(set_type)
            ),
            "image": encode(reference_image),
        });
        self.run_image(IMAGE_MODEL, body).await
    }

    /// Re-render an outfit for a different wearing context, keeping the
    /// listed pieces unchanged.
    pub async fn generate_outfit_context_variation(
        &self,
        pieces: &[ProviderPiece],
        target_context: &str,
        maintain_pieces: &[Uuid],
    ) -> Result<GeneratedImage, ProviderError> {
        let body = serde_json::json!({
            "prompt": format!(
                "Adapt this outfit for the following context: {target_context}. \
                 Keep the listed pieces exactly as shown."
            ),
            "items": pieces,
            "maintain": maintain_pieces,
        });
        self.run_image(IMAGE_MODEL, body).await
    }

    /// Re-render an item image in the style of a reference image.
    /// `strength` in [0.3, 0.9], validated upstream at submission.
    pub async fn apply_style_transfer(
        &self,
        item_image: &[u8],
        style_reference_image: &[u8],
        strength: f64,
    ) -> Result<GeneratedImage, ProviderError> {
        let body = serde_json::json!({
            "prompt": "Re-render the clothing item in the style of the reference image.",
            "image": encode(item_image),
            "style_image": encode(style_reference_image),
            "strength": strength,
        });
        self.run_image(IMAGE_MODEL, body).await
    }

    /// Render an outfit either as a flat-lay board or worn by a person.
    pub async fn generate_outfit_visualization(
        &self,
        pieces: &[ProviderPiece],
        mode: VisualizationMode,
    ) -> Result<GeneratedImage, ProviderError> {
        let prompt = match mode {
            VisualizationMode::OutfitBoard => {
                "Compose these clothing items into a clean flat-lay outfit board."
            }
            VisualizationMode::PersonWearing => {
                "Render a person wearing this complete outfit, full-length studio photo."
            }
        };
        let body = serde_json::json!({
            "prompt": prompt,
            "items": pieces,
        });
        self.run_image(IMAGE_MODEL, body).await
    }

    /// Infer wardrobe attributes (category, colors, seasons, style tags)
    /// from an item's image.
    pub async fn infer_item_attributes(
        &self,
        image: &[u8],
    ) -> Result<InferredItemAttributes, ProviderError> {
        let prompt = concat!(
            "Analyze this clothing item photo and return JSON with these exact fields: ",
            "category, colors (array), seasons (array), style_tags (array), ",
            "pattern, material_guess. Return ONLY valid JSON."
        );
        let body = serde_json::json!({
            "prompt": prompt,
            "image": encode(image),
            "max_tokens": 512,
        });
        self.run_structured(VISION_MODEL, body).await
    }

    /// Read the brand/size/material/care fields off a garment's care label.
    pub async fn extract_label_fields(
        &self,
        label_image: &[u8],
    ) -> Result<CareLabelFields, ProviderError> {
        let prompt = concat!(
            "Read this garment care label and return JSON with these exact fields: ",
            "brand, size, material_composition, care_instructions (array), ",
            "country_of_origin. Return ONLY valid JSON."
        );
        let body = serde_json::json!({
            "prompt": prompt,
            "image": encode(label_image),
            "max_tokens": 512,
        });
        self.run_structured(VISION_MODEL, body).await
    }

    /// Run a generation model and extract the generated image reference.
    async fn run_image(
        &self,
        model: &str,
        body: serde_json::Value,
    ) -> Result<GeneratedImage, ProviderError> {
        let result = self.run(model, body).await?;
        let image_key = result
            .get("image_key")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ProviderError::MalformedResponse("response carries no image_key".to_string())
            })?;
        Ok(GeneratedImage {
            image_key: image_key.to_string(),
        })
    }

    /// Run a vision model and parse its description as typed JSON fields,
    /// after the response-repair step.
    async fn run_structured<T: serde::de::DeserializeOwned>(
        &self,
        model: &str,
        body: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let result = self.run(model, body).await?;
        let description = result
            .get("description")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ProviderError::MalformedResponse("response carries no description".to_string())
            })?;
        let repaired = repair_json(description);
        serde_json::from_str(repaired).map_err(|e| {
            ProviderError::MalformedResponse(format!("description is not the expected JSON: {e}"))
        })
    }

    async fn run(
        &self,
        model: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let url = format!("{}/{}", self.api_base, model);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(format!("{status}: {detail}")));
        }
        if !status.is_success() {
            return Err(ProviderError::MalformedResponse(format!(
                "unexpected status {status}"
            )));
        }

        let envelope: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::MalformedResponse(e.to_string())
            }
        })?;
        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| ProviderError::MalformedResponse("envelope has no result".to_string()))
    }
}

fn encode(image: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(image)
}

fn set_type_label(set_type: SetType) -> &'static str {
    match set_type {
        SetType::TwoPiece => "two-piece set",
        SetType::ThreePiece => "three-piece set",
        SetType::CompleteOutfit => "complete outfit",
    }
}

/// Models wrap JSON answers in markdown fences often enough that stripping
/// them is part of the parse, not an error path.
fn repair_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider did not respond within the time budget")]
    Timeout,

    #[error("provider rejected the input: {0}")]
    Rejected(String),

    #[error("provider response did not match the expected schema: {0}")]
    MalformedResponse(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    /// Stable code recorded in the job record's structured error.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Timeout => "provider_timeout",
            ProviderError::Rejected(_) => "provider_rejected",
            ProviderError::MalformedResponse(_) => "provider_malformed_response",
            ProviderError::Http(_) => "provider_unreachable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_json_strips_markdown_fences() {
        assert_eq!(repair_json("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(repair_json("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(repair_json("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(repair_json("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn repaired_description_parses_into_attributes() {
        let raw = r#"```json
        {
          "category": "jacket",
          "colors": ["navy"],
          "seasons": ["fall", "winter"],
          "style_tags": ["casual"],
          "pattern": null,
          "material_guess": "wool"
        }
        ```"#;
        let parsed: InferredItemAttributes = serde_json::from_str(repair_json(raw)).unwrap();
        assert_eq!(parsed.category, "jacket");
        assert_eq!(parsed.material_guess.as_deref(), Some("wool"));
    }

    #[test]
    fn models_are_recorded_per_kind() {
        assert_eq!(model_for(JobKind::InferItem), VISION_MODEL);
        assert_eq!(model_for(JobKind::ExtractLabel), VISION_MODEL);
        assert_eq!(model_for(JobKind::GenerateCatalogImage), IMAGE_MODEL);
        assert_eq!(model_for(JobKind::GenerateOutfitVisualization), IMAGE_MODEL);
    }
}
