use std::time::Duration;

use base64::Engine;
use tokio::time::timeout;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::job_queries::{self, JobStoreError};
use crate::db::catalog_queries;
use crate::models::job::{
    CatalogImageInput, JobError, JobInput, JobRecord, JobStatus,
};
use crate::services::lease::LeaseError;
use crate::services::provider::{self, GeneratedImage, ProviderError, ProviderPiece};
use crate::services::queue::{DeliveryOutcome, QueueError, QueuedJob};
use crate::services::storage::StorageError;

/// Hard wall-clock budget for one handler invocation, provider call
/// included. Exceeding it counts as a failed attempt, not a hang.
const HANDLER_BUDGET: Duration = Duration::from_secs(60);

/// Backoff before re-offering a delivery whose lease another worker holds.
const LEASE_BUSY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Failure of a single processing attempt. All variants are treated
/// uniformly by the retry policy; the distinction only feeds the structured
/// error recorded on the terminal transition.
#[derive(Debug, thiserror::Error)]
enum HandlerError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("asset fetch failed: {0}")]
    Storage(#[from] StorageError),

    #[error("catalog lookup failed: {0}")]
    Catalog(#[from] sqlx::Error),

    #[error("item {0} no longer exists")]
    ItemGone(Uuid),

    #[error("item {0} has no image")]
    MissingImage(Uuid),

    #[error("outfit {0} has no renderable items")]
    EmptyOutfit(Uuid),

    #[error("stored input does not match job type: {0}")]
    CorruptInput(String),

    #[error("handler exceeded the {}s budget", HANDLER_BUDGET.as_secs())]
    BudgetExceeded,
}

impl HandlerError {
    fn code(&self) -> &'static str {
        match self {
            HandlerError::Provider(e) => e.code(),
            HandlerError::Storage(_) => "asset_unavailable",
            HandlerError::Catalog(_) => "catalog_unavailable",
            HandlerError::ItemGone(_) => "item_gone",
            HandlerError::MissingImage(_) => "missing_image",
            HandlerError::EmptyOutfit(_) => "empty_outfit",
            HandlerError::CorruptInput(_) => "corrupt_input",
            HandlerError::BudgetExceeded => "provider_timeout",
        }
    }
}

/// Pull and process one delivery. Returns `Ok(true)` if a delivery was
/// handled (in any way), `Ok(false)` if the queue was empty.
pub async fn process_next(state: &AppState) -> Result<bool, WorkerError> {
    let Some(delivery) = state.queue.dequeue().await? else {
        return Ok(false);
    };

    // At most one concurrent handler per job id across all workers.
    let Some(token) = state.leases.acquire(delivery.job_id).await? else {
        tracing::debug!(job_id = %delivery.job_id, "lease held elsewhere, deferring delivery");
        state.queue.defer(&delivery, LEASE_BUSY_DELAY).await?;
        return Ok(true);
    };

    // The lease must be released on every exit path, so the delivery runs
    // inside its own fallible block and errors propagate only afterwards.
    let run = run_delivery(state, &delivery).await;
    if let Err(e) = state.leases.release(delivery.job_id, &token).await {
        tracing::error!(job_id = %delivery.job_id, error = %e, "failed to release lease; TTL will reclaim it");
    }
    run?;
    Ok(true)
}

async fn run_delivery(state: &AppState, delivery: &QueuedJob) -> Result<(), WorkerError> {
    let Some(record) = job_queries::get_job(&state.db, delivery.job_id).await? else {
        tracing::error!(job_id = %delivery.job_id, "delivery references unknown job record, dropping");
        state.queue.finish(delivery, DeliveryOutcome::Failed).await?;
        return Ok(());
    };

    if record.status.is_terminal() {
        // A late duplicate delivery; the record already settled.
        tracing::warn!(job_id = %record.id, status = %record.status, "duplicate delivery for settled job, dropping");
        let outcome = match record.status {
            JobStatus::Completed => DeliveryOutcome::Completed,
            _ => DeliveryOutcome::Failed,
        };
        state.queue.finish(delivery, outcome).await?;
        return Ok(());
    }

    let record = match job_queries::transition_job(
        &state.db,
        record.id,
        JobStatus::Processing,
        None,
        None,
        None,
    )
    .await
    {
        Ok(r) => r,
        Err(JobStoreError::InvalidTransition { id, from, to }) => {
            // Racing transition; the forward-only guard held. Never a user
            // error, drop the delivery.
            tracing::error!(job_id = %id, %from, %to, "transition rejected by guard, dropping delivery");
            state.queue.finish(delivery, DeliveryOutcome::Failed).await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(
        job_id = %record.id,
        kind = %record.kind,
        attempt = delivery.attempt,
        "processing job"
    );

    let started = std::time::Instant::now();
    let outcome = match timeout(HANDLER_BUDGET, run_handler(state, &record)).await {
        Ok(result) => result,
        Err(_) => Err(HandlerError::BudgetExceeded),
    };

    match outcome {
        Ok(result_json) => {
            let model = provider::model_for(record.kind);
            job_queries::transition_job(
                &state.db,
                record.id,
                JobStatus::Completed,
                Some(result_json),
                None,
                Some(model),
            )
            .await?;
            state
                .queue
                .finish(delivery, DeliveryOutcome::Completed)
                .await?;

            metrics::counter!("ai_jobs_completed_total").increment(1);
            metrics::histogram!("ai_job_processing_seconds")
                .record(started.elapsed().as_secs_f64());

            tracing::info!(
                job_id = %record.id,
                kind = %record.kind,
                elapsed_ms = started.elapsed().as_millis(),
                "job completed"
            );
        }
        Err(handler_err) => {
            tracing::error!(
                job_id = %record.id,
                kind = %record.kind,
                attempt = delivery.attempt,
                error = %handler_err,
                "attempt failed"
            );

            if let Some(delay) = state.queue.schedule_retry(delivery).await? {
                // Record stays `processing` (observable, non-terminal)
                // until the redelivery.
                tracing::info!(
                    job_id = %record.id,
                    attempt = delivery.attempt,
                    retry_in_ms = delay.as_millis(),
                    "retry scheduled"
                );
            } else {
                let error = JobError {
                    code: handler_err.code().to_string(),
                    message: handler_err.to_string(),
                    attempts: delivery.attempt,
                };
                let error_json = serde_json::to_value(&error)
                    .unwrap_or_else(|_| serde_json::json!({ "code": "unknown" }));
                job_queries::transition_job(
                    &state.db,
                    record.id,
                    JobStatus::Failed,
                    None,
                    Some(error_json),
                    None,
                )
                .await?;
                state.queue.finish(delivery, DeliveryOutcome::Failed).await?;

                metrics::counter!("ai_jobs_failed_total").increment(1);

                tracing::warn!(
                    job_id = %record.id,
                    attempts = delivery.attempt,
                    "job failed after exhausting attempts"
                );
            }
        }
    }

    Ok(())
}

/// Route the record to its handler by kind and return the result payload to
/// persist on completion.
async fn run_handler(
    state: &AppState,
    record: &JobRecord,
) -> Result<serde_json::Value, HandlerError> {
    let input: JobInput = serde_json::from_value(record.input.clone())
        .map_err(|e| HandlerError::CorruptInput(e.to_string()))?;

    match input {
        JobInput::GenerateCatalogImage(inner) => {
            let image = item_image(state, record).await?;
            let generated = match inner {
                CatalogImageInput::MatchingItem {
                    target_category,
                    style_notes,
                } => {
                    state
                        .provider
                        .generate_matching_item(&image, &target_category, style_notes.as_deref())
                        .await?
                }
                CatalogImageInput::CoordinatedSet { set_type } => {
                    state
                        .provider
                        .generate_coordinated_set(&image, set_type)
                        .await?
                }
                CatalogImageInput::StyleTransfer {
                    style_image_key,
                    strength,
                } => {
                    let style_image = state.assets.fetch(&style_image_key).await?;
                    state
                        .provider
                        .apply_style_transfer(&image, &style_image, strength)
                        .await?
                }
            };
            Ok(image_result(generated))
        }
        JobInput::InferItem {} => {
            let image = item_image(state, record).await?;
            let attributes = state.provider.infer_item_attributes(&image).await?;
            Ok(serde_json::json!({ "attributes": attributes }))
        }
        JobInput::ExtractLabel {} => {
            let image = item_image(state, record).await?;
            let label = state.provider.extract_label_fields(&image).await?;
            Ok(serde_json::json!({ "label": label }))
        }
        JobInput::GenerateOutfit(inner) => {
            let pieces = outfit_pieces(state, record).await?;
            let generated = state
                .provider
                .generate_outfit_context_variation(
                    &pieces,
                    &inner.target_context,
                    &inner.maintain_pieces,
                )
                .await?;
            Ok(image_result(generated))
        }
        JobInput::GenerateOutfitVisualization(inner) => {
            let pieces = outfit_pieces(state, record).await?;
            let generated = state
                .provider
                .generate_outfit_visualization(&pieces, inner.mode)
                .await?;
            Ok(image_result(generated))
        }
    }
}

fn image_result(generated: GeneratedImage) -> serde_json::Value {
    serde_json::json!({ "image_key": generated.image_key })
}

/// Resolve the job's item to its image bytes. Existence was checked at
/// submission; the item may have been deleted since, which surfaces here as
/// a handler failure rather than corrupting job history.
async fn item_image(state: &AppState, record: &JobRecord) -> Result<Vec<u8>, HandlerError> {
    let item_id = record
        .item_id
        .ok_or_else(|| HandlerError::CorruptInput("record has no item reference".to_string()))?;
    let item = catalog_queries::get_item(&state.db, item_id)
        .await?
        .ok_or(HandlerError::ItemGone(item_id))?;
    let key = item.image_key.ok_or(HandlerError::MissingImage(item_id))?;
    Ok(state.assets.fetch(&key).await?)
}

/// Resolve the job's outfit to provider pieces, skipping items without
/// images. An outfit with nothing renderable left fails the attempt.
async fn outfit_pieces(
    state: &AppState,
    record: &JobRecord,
) -> Result<Vec<ProviderPiece>, HandlerError> {
    let outfit_id = record
        .outfit_id
        .ok_or_else(|| HandlerError::CorruptInput("record has no outfit reference".to_string()))?;
    let rows = catalog_queries::get_outfit_pieces(&state.db, outfit_id).await?;

    let mut pieces = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(key) = row.image_key else { continue };
        let bytes = state.assets.fetch(&key).await?;
        pieces.push(ProviderPiece {
            id: row.item_id,
            image: base64::engine::general_purpose::STANDARD.encode(&bytes),
            category: row.category,
        });
    }

    if pieces.is_empty() {
        return Err(HandlerError::EmptyOutfit(outfit_id));
    }
    Ok(pieces)
}
