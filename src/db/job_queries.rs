use chrono::{Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{JobInput, JobRecord, JobStatus};

const RECORD_COLUMNS: &str = "id, kind, status, item_id, outfit_id, input, model_name, \
                              attempts, result, error, created_at, updated_at";

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn row_to_record(row: &PgRow) -> Result<JobRecord, sqlx::Error> {
    let kind_str: String = row.try_get("kind")?;
    let status_str: String = row.try_get("status")?;

    let decode = |column: &'static str, value: &str| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unrecognized value {value:?}").into(),
    };

    Ok(JobRecord {
        id: row.try_get("id")?,
        kind: kind_str.parse().map_err(|_| decode("kind", &kind_str))?,
        status: status_str
            .parse()
            .map_err(|_| decode("status", &status_str))?,
        item_id: row.try_get("item_id")?,
        outfit_id: row.try_get("outfit_id")?,
        input: row.try_get("input")?,
        model_name: row.try_get("model_name")?,
        attempts: row.try_get("attempts")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new job record in `queued` state.
pub async fn create_job(
    pool: &PgPool,
    input: &JobInput,
    item_id: Option<Uuid>,
    outfit_id: Option<Uuid>,
) -> Result<JobRecord, JobStoreError> {
    let input_json =
        serde_json::to_value(input).map_err(|e| JobStoreError::Database(sqlx::Error::Encode(e.into())))?;

    let row = sqlx::query(&format!(
        r#"
        INSERT INTO ai_jobs (kind, status, item_id, outfit_id, input)
        VALUES ($1, 'queued', $2, $3, $4)
        RETURNING {RECORD_COLUMNS}
        "#
    ))
    .bind(input.kind().to_string())
    .bind(item_id)
    .bind(outfit_id)
    .bind(input_json)
    .fetch_one(pool)
    .await?;

    Ok(row_to_record(&row)?)
}

/// Get a job record by id.
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<JobRecord>, JobStoreError> {
    let row = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM ai_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_record).transpose().map_err(Into::into)
}

/// List job records newest first, optionally filtered by item, status and
/// kind. `limit` caps the page size.
pub async fn list_jobs(
    pool: &PgPool,
    item_id: Option<Uuid>,
    status: Option<JobStatus>,
    kind: Option<String>,
    limit: i64,
) -> Result<Vec<JobRecord>, JobStoreError> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {RECORD_COLUMNS}
        FROM ai_jobs
        WHERE ($1::uuid IS NULL OR item_id = $1)
          AND ($2::text IS NULL OR status = $2)
          AND ($3::text IS NULL OR kind = $3)
        ORDER BY created_at DESC
        LIMIT $4
        "#
    ))
    .bind(item_id)
    .bind(status.map(|s| s.to_string()))
    .bind(kind)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| row_to_record(r).map_err(Into::into))
        .collect()
}

/// Transition a job record forward. The status guard is enforced in the
/// UPDATE itself so racing workers cannot move a record backward; `result`
/// and `error` are written only if still NULL (set exactly once), and the
/// attempts counter increments on every entry into `processing`.
pub async fn transition_job(
    pool: &PgPool,
    job_id: Uuid,
    new_status: JobStatus,
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
    model_name: Option<&str>,
) -> Result<JobRecord, JobStoreError> {
    debug_assert!(
        result.is_none() || error.is_none(),
        "result and error are mutually exclusive"
    );

    let allowed: Vec<String> = JobStatus::allowed_predecessors(new_status)
        .iter()
        .map(|s| s.to_string())
        .collect();

    let row = sqlx::query(&format!(
        r#"
        UPDATE ai_jobs
        SET status = $2,
            attempts = attempts + CASE WHEN $2 = 'processing' THEN 1 ELSE 0 END,
            result = CASE WHEN result IS NULL THEN $3 ELSE result END,
            error = CASE WHEN error IS NULL THEN $4 ELSE error END,
            model_name = COALESCE($5, model_name),
            updated_at = NOW()
        WHERE id = $1 AND status = ANY($6)
        RETURNING {RECORD_COLUMNS}
        "#
    ))
    .bind(job_id)
    .bind(new_status.to_string())
    .bind(result)
    .bind(error)
    .bind(model_name)
    .bind(&allowed)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => Ok(row_to_record(&r)?),
        None => {
            // Distinguish a missing record from a guard rejection.
            match get_job(pool, job_id).await? {
                Some(current) => Err(JobStoreError::InvalidTransition {
                    id: job_id,
                    from: current.status,
                    to: new_status,
                }),
                None => Err(JobStoreError::NotFound(job_id)),
            }
        }
    }
}

/// Ids of records stuck in `queued` longer than `grace`. Candidates for the
/// reconciliation sweep: created but possibly never enqueued (the
/// create-then-enqueue seam in the submission gateway is not atomic).
pub async fn stranded_queued_jobs(
    pool: &PgPool,
    grace: Duration,
    limit: i64,
) -> Result<Vec<Uuid>, JobStoreError> {
    let cutoff = Utc::now() - grace;

    let rows = sqlx::query(
        r#"
        SELECT id FROM ai_jobs
        WHERE status = 'queued' AND updated_at < $1
        ORDER BY updated_at ASC
        LIMIT $2
        "#,
    )
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| r.try_get("id").map_err(Into::into))
        .collect()
}

/// Records stuck in `processing` longer than `grace`. A worker that crashed
/// mid-flight leaves the record here after its lease and live marker expire
/// on their own; the sweep either redelivers or fails these.
pub async fn stale_processing_jobs(
    pool: &PgPool,
    grace: Duration,
    limit: i64,
) -> Result<Vec<JobRecord>, JobStoreError> {
    let cutoff = Utc::now() - grace;

    let rows = sqlx::query(&format!(
        r#"
        SELECT {RECORD_COLUMNS} FROM ai_jobs
        WHERE status = 'processing' AND updated_at < $1
        ORDER BY updated_at ASC
        LIMIT $2
        "#
    ))
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| row_to_record(r).map_err(Into::into))
        .collect()
}
