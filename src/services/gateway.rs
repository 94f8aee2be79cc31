use chrono::Duration as ChronoDuration;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::job_queries::JobStoreError;
use crate::db::{catalog_queries, job_queries};
use crate::error::AppError;
use crate::models::job::{JobError, JobInput, JobKind, JobRecord, JobStatus};
use crate::services::queue::{DeliveryOutcome, QueuedJob, MAX_ATTEMPTS};

/// How long a record may sit in `queued` before the sweep treats it as
/// possibly stranded by a failed enqueue.
const STRANDED_GRACE_SECS: i64 = 120;

/// How long a record may sit in `processing` with no progress before the
/// sweep treats its worker as lost. Must exceed the handler budget and the
/// lease TTL so an attempt still in flight is never reaped.
const ABANDONED_GRACE_SECS: i64 = 300;

/// Max records examined per sweep pass.
const SWEEP_BATCH: i64 = 100;

/// Validate a submission and turn it into a queued job record plus one live
/// queue message. Create-then-enqueue is deliberately not atomic: if the
/// enqueue step fails the record stays `queued` and the reconciliation
/// sweep re-enqueues it, rather than blocking or failing the caller.
pub async fn submit(
    state: &AppState,
    kind: JobKind,
    item_id: Option<Uuid>,
    outfit_id: Option<Uuid>,
    input_refs: Option<serde_json::Value>,
) -> Result<JobRecord, AppError> {
    if !state.ai_enabled {
        return Err(AppError::AiDisabled);
    }

    let input = JobInput::from_request(kind, input_refs)?;

    // Refs carry at most the subset relevant to the kind, and must exist
    // now; job history keeps the id even if the entity is deleted later.
    let (item_id, outfit_id) = if kind.requires_item() {
        if outfit_id.is_some() {
            return Err(AppError::Validation(format!(
                "job type {kind} does not take an outfitId"
            )));
        }
        let id = item_id.ok_or_else(|| {
            AppError::Validation(format!("job type {kind} requires an itemId"))
        })?;
        catalog_queries::get_item(&state.db, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("item {id}")))?;
        (Some(id), None)
    } else {
        if item_id.is_some() {
            return Err(AppError::Validation(format!(
                "job type {kind} does not take an itemId"
            )));
        }
        let id = outfit_id.ok_or_else(|| {
            AppError::Validation(format!("job type {kind} requires an outfitId"))
        })?;
        catalog_queries::get_outfit(&state.db, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("outfit {id}")))?;
        (None, Some(id))
    };

    let record = job_queries::create_job(&state.db, &input, item_id, outfit_id).await?;

    metrics::counter!("ai_jobs_submitted_total", "kind" => kind.to_string()).increment(1);

    match state.queue.enqueue(record.id, kind).await {
        Ok(true) => {
            tracing::info!(job_id = %record.id, kind = %kind, "job submitted");
        }
        Ok(false) => {
            // Cannot happen for a freshly created id unless a marker
            // collided; harmless either way, the id has a live message.
            tracing::warn!(job_id = %record.id, "live queue message already present at submit");
        }
        Err(e) => {
            // Record exists but no queue message does; the sweep closes
            // this gap. The submitter still gets the queued record.
            tracing::error!(job_id = %record.id, error = %e, "enqueue failed after create; record awaits reconciliation");
        }
    }

    Ok(record)
}

/// Reconciliation sweep. Two passes:
/// 1. `queued` records past the grace period with no live queue message
///    (create succeeded, enqueue never did) are re-enqueued.
/// 2. `processing` records with no progress past the abandoned grace
///    period (worker crashed mid-flight; lease and live marker expire on
///    their own, the record does not) are redelivered while attempts
///    remain, otherwise transitioned to `failed`.
/// Returns how many records were re-enqueued or redelivered.
pub async fn sweep_stranded(state: &AppState) -> Result<u32, AppError> {
    let stranded = job_queries::stranded_queued_jobs(
        &state.db,
        ChronoDuration::seconds(STRANDED_GRACE_SECS),
        SWEEP_BATCH,
    )
    .await?;

    let mut requeued = 0u32;
    for job_id in stranded {
        if state.queue.is_live(job_id).await? {
            continue;
        }
        let Some(record) = job_queries::get_job(&state.db, job_id).await? else {
            continue;
        };
        if state.queue.enqueue(record.id, record.kind).await? {
            requeued += 1;
            tracing::warn!(job_id = %record.id, kind = %record.kind, "re-enqueued stranded job");
        }
    }

    let abandoned = job_queries::stale_processing_jobs(
        &state.db,
        ChronoDuration::seconds(ABANDONED_GRACE_SECS),
        SWEEP_BATCH,
    )
    .await?;

    for record in abandoned {
        // The crashed attempt is the one the record already counted.
        let delivery = QueuedJob {
            job_id: record.id,
            kind: record.kind,
            attempt: record.attempts.max(1) as u32,
        };

        if delivery.attempt < MAX_ATTEMPTS {
            if state.queue.recover(&delivery).await?.is_some() {
                requeued += 1;
                tracing::warn!(
                    job_id = %record.id,
                    attempt = delivery.attempt,
                    "redelivering job abandoned in processing"
                );
            }
            continue;
        }

        let error = serde_json::to_value(JobError {
            code: "worker_lost".to_string(),
            message: format!("no worker progress for over {ABANDONED_GRACE_SECS}s"),
            attempts: delivery.attempt,
        })
        .unwrap_or_else(|_| serde_json::json!({ "code": "worker_lost" }));
        match job_queries::transition_job(
            &state.db,
            record.id,
            JobStatus::Failed,
            None,
            Some(error),
            None,
        )
        .await
        {
            Ok(_) => {
                tracing::warn!(
                    job_id = %record.id,
                    attempts = delivery.attempt,
                    "failed abandoned job with attempts exhausted"
                );
            }
            // A worker settled the record between the scan and the update.
            Err(JobStoreError::InvalidTransition { .. }) | Err(JobStoreError::NotFound(_)) => {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
        state.queue.finish(&delivery, DeliveryOutcome::Failed).await?;
    }

    if requeued > 0 {
        tracing::info!(requeued, "reconciliation sweep recovered jobs");
    }
    Ok(requeued)
}
