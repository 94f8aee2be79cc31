use std::time::Duration;

use chrono::Utc;
use redis::{AsyncCommands, ExistenceCheck, SetExpiry, SetOptions};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobKind;

const READY_KEY: &str = "wardrobe_ai:ready";
const PROCESSING_KEY: &str = "wardrobe_ai:processing";
const DELAYED_KEY: &str = "wardrobe_ai:delayed";
const LIVE_KEY_PREFIX: &str = "wardrobe_ai:live:";
const COMPLETED_HISTORY_KEY: &str = "wardrobe_ai:history:completed";
const FAILED_HISTORY_KEY: &str = "wardrobe_ai:history:failed";

/// Delivery attempts per message, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff between redeliveries.
const RETRY_BASE: Duration = Duration::from_secs(2);

/// TTL of the per-job live marker. A marker orphaned by a crashed worker
/// expires so the reconciliation sweep can re-enqueue the record.
const LIVE_TTL_SECS: u64 = 3600;

/// Bounded queue-level metadata history; the job record store keeps the
/// full history, these only bound queue storage.
const COMPLETED_HISTORY_LEN: isize = 100;
const FAILED_HISTORY_LEN: isize = 500;

/// How many due delayed entries to promote per dequeue.
const PROMOTE_BATCH: isize = 16;

/// Backoff before redelivering after a failed attempt: 2s, 4s, 8s,
/// capped at [`MAX_ATTEMPTS`]. `None` once attempts are exhausted.
pub fn retry_delay(failed_attempt: u32) -> Option<Duration> {
    if failed_attempt == 0 || failed_attempt >= MAX_ATTEMPTS {
        return None;
    }
    Some(RETRY_BASE * 2u32.pow(failed_attempt - 1))
}

/// Job message serialized into Redis. Intentionally thin: the dispatcher
/// loads everything else from the job record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub kind: JobKind,
    /// 1-based delivery attempt this message represents.
    pub attempt: u32,
}

/// Terminal outcome of a delivery, for queue-level history only.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Completed,
    Failed,
}

/// Redis-backed job queue: at-least-once delivery, idempotent enqueue via a
/// per-id live marker, exponential-backoff redelivery with a hard attempt
/// cap.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    fn live_key(job_id: Uuid) -> String {
        format!("{LIVE_KEY_PREFIX}{job_id}")
    }

    /// Enqueue the first delivery for a job. Idempotent: if a live message
    /// already exists for this id the call is a no-op and returns `false`.
    /// This is what keeps a retried HTTP submission (or the reconciliation
    /// sweep racing a live delivery) from double-processing a job.
    pub async fn enqueue(&self, job_id: Uuid, kind: JobKind) -> Result<bool, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;

        let opts = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::EX(LIVE_TTL_SECS));
        let claimed: bool = conn
            .set_options(Self::live_key(job_id), 1, opts)
            .await
            .map_err(QueueError::Redis)?;

        if !claimed {
            return Ok(false);
        }

        let job = QueuedJob {
            job_id,
            kind,
            attempt: 1,
        };
        let payload = serde_json::to_string(&job).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(READY_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(true)
    }

    /// Dequeue the next delivery, promoting any due delayed redeliveries
    /// first. The popped message moves to the processing list so it is
    /// never silently lost mid-flight.
    pub async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;

        self.promote_due(&mut conn).await?;

        let result: Option<String> = conn
            .rpoplpush(READY_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => {
                let job: QueuedJob =
                    serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Move delayed entries whose due time has passed onto the ready list.
    /// ZREM guards the race between workers promoting the same entry: only
    /// the one that removed it pushes it.
    async fn promote_due(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
    ) -> Result<(), QueueError> {
        let now = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(DELAYED_KEY, "-inf", now, 0, PROMOTE_BATCH)
            .await
            .map_err(QueueError::Redis)?;

        for payload in due {
            let removed: i64 = conn
                .zrem(DELAYED_KEY, &payload)
                .await
                .map_err(QueueError::Redis)?;
            if removed > 0 {
                conn.lpush::<_, _, ()>(READY_KEY, &payload)
                    .await
                    .map_err(QueueError::Redis)?;
            }
        }
        Ok(())
    }

    /// Schedule the next redelivery for a failed attempt. Returns the
    /// backoff delay, or `None` when attempts are exhausted — in which case
    /// the message stays owned by the caller until it acknowledges the
    /// terminal outcome via [`finish`](Self::finish).
    pub async fn schedule_retry(&self, job: &QueuedJob) -> Result<Option<Duration>, QueueError> {
        let Some(delay) = retry_delay(job.attempt) else {
            return Ok(None);
        };

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;

        let next = QueuedJob {
            attempt: job.attempt + 1,
            ..job.clone()
        };
        let next_payload = serde_json::to_string(&next).map_err(QueueError::Serialize)?;
        let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;

        conn.zadd::<_, _, _, ()>(DELAYED_KEY, &next_payload, due)
            .await
            .map_err(QueueError::Redis)?;

        self.forget_delivery(&mut conn, job).await?;
        Ok(Some(delay))
    }

    /// Reclaim a delivery abandoned mid-flight by a crashed worker: refresh
    /// the live marker (it may have expired while the delivery sat in the
    /// processing list), drop the stale in-flight payload and schedule the
    /// next attempt with the usual backoff. `None` once attempts are
    /// exhausted, in which case the caller settles the record and
    /// acknowledges via [`finish`](Self::finish).
    pub async fn recover(&self, job: &QueuedJob) -> Result<Option<Duration>, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        conn.set_ex::<_, _, ()>(Self::live_key(job.job_id), 1, LIVE_TTL_SECS)
            .await
            .map_err(QueueError::Redis)?;
        self.schedule_retry(job).await
    }

    /// Put a delivery back (unchanged attempt) after a short delay. Used
    /// when another worker holds the processing lease for the same id.
    pub async fn defer(&self, job: &QueuedJob, delay: Duration) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;

        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        conn.zadd::<_, _, _, ()>(DELAYED_KEY, &payload, due)
            .await
            .map_err(QueueError::Redis)?;

        self.forget_delivery(&mut conn, job).await?;
        Ok(())
    }

    /// Acknowledge a terminal outcome: drop the in-flight delivery, clear
    /// the live marker so the id can be enqueued again, and record a
    /// bounded metadata entry.
    pub async fn finish(
        &self,
        job: &QueuedJob,
        outcome: DeliveryOutcome,
    ) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;

        self.forget_delivery(&mut conn, job).await?;
        conn.del::<_, ()>(Self::live_key(job.job_id))
            .await
            .map_err(QueueError::Redis)?;

        let (history_key, keep) = match outcome {
            DeliveryOutcome::Completed => (COMPLETED_HISTORY_KEY, COMPLETED_HISTORY_LEN),
            DeliveryOutcome::Failed => (FAILED_HISTORY_KEY, FAILED_HISTORY_LEN),
        };
        let entry = serde_json::to_string(&serde_json::json!({
            "job_id": job.job_id,
            "kind": job.kind,
            "attempt": job.attempt,
            "outcome": outcome,
            "finished_at": Utc::now(),
        }))
        .map_err(QueueError::Serialize)?;

        conn.lpush::<_, _, ()>(history_key, &entry)
            .await
            .map_err(QueueError::Redis)?;
        conn.ltrim::<_, ()>(history_key, 0, keep - 1)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn forget_delivery(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job: &QueuedJob,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Whether a live (non-terminal, non-expired) message exists for the id.
    pub async fn is_live(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let exists: bool = conn
            .exists(Self::live_key(job_id))
            .await
            .map_err(QueueError::Redis)?;
        Ok(exists)
    }

    /// Pending deliveries: ready plus delayed.
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let ready: u64 = conn.llen(READY_KEY).await.map_err(QueueError::Redis)?;
        let delayed: u64 = conn.zcard(DELAYED_KEY).await.map_err(QueueError::Redis)?;
        Ok(ready + delayed)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
